// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    clap::{Arg, ArgMatches, Command},
    debian_mirroring::{
        cleanup::cleanup_unreferenced,
        download::CancelFlag,
        error::MirrorError,
        http::HttpDownloader,
        index::HttpPackageIndexSource,
        mirror::{MirrorStatus, RemoteMirror, UpdateOptions},
        package_list::DependencyOptions,
        pool::FilesystemPool,
        progress::Progress,
        reflist::RefList,
        store::{FileStateStore, StateChecksumStore, StatePackageStore},
    },
    serde::Deserialize,
    std::{
        path::PathBuf,
        sync::{Arc, Mutex},
    },
    thiserror::Error,
};

const CREATE_MIRROR_ABOUT: &str = "\
Create a mirror from a YAML definition.

The YAML file describes one mirror:

name (required) (string)
   Unique name of the mirror. Used to address it in other commands.

archive_root (required) (string)
   Base URL of the remote repository, e.g. `http://deb.debian.org/debian`.

distribution (required) (string)
   Distribution under `dists/`, e.g. `bullseye`.

components (required) (list[string])
   Components to mirror, e.g. `main`, `contrib`.

architectures (required) (list[string])
   Binary architectures to mirror, e.g. `amd64`. Packages with
   architecture `all` are always accepted.

filter (optional) (list[string])
   Package query expressions restricting what is mirrored, using
   dependency syntax, e.g. `nginx (>= 1.18)`. Empty means everything.

filter_with_deps (optional) (bool)
   Expand the filter with the dependency closure of matched packages.

Creating a mirror records its definition only. Run `update-mirror` to
fetch content.
";

const UPDATE_MIRROR_ABOUT: &str = "\
Update a mirror from its remote repository.

Fetches the `Packages` indices for every configured component and
architecture, applies the mirror's filter, and downloads missing package
files into the local pool with bounded concurrency.

Updates take a persisted lock on the mirror. If a previous update crashed
without releasing the lock, pass --force to take it over.

Ctrl-C requests a graceful stop: in-flight downloads finish and are
imported into the pool, then the command exits with an error. A later
update resumes from what was already downloaded.
";

/// Mirror definition as read from a YAML file.
#[derive(Debug, Deserialize)]
struct MirrorConfig {
    name: String,
    archive_root: String,
    distribution: String,
    components: Vec<String>,
    architectures: Vec<String>,
    #[serde(default)]
    filter: Vec<String>,
    #[serde(default)]
    filter_with_deps: bool,
}

#[derive(Debug, Error)]
pub enum DmtError {
    #[error("argument parsing error: {0:?}")]
    Clap(#[from] clap::Error),

    #[error("{0}")]
    Mirror(#[from] MirrorError),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0:?}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("mirror {0} already exists")]
    MirrorExists(String),

    #[error("invalid sub-command: {0}")]
    InvalidSubCommand(String),
}

pub type Result<T> = std::result::Result<T, DmtError>;

/// [Progress] sink rendering to the terminal with a [pbr] progress bar.
#[derive(Clone, Default)]
struct TerminalProgress {
    bar: Arc<Mutex<Option<pbr::ProgressBar<std::io::Stdout>>>>,
}

impl Progress for TerminalProgress {
    fn printf(&self, msg: &str) {
        println!("{}", msg);
    }

    fn init_bar(&self, total: u64, is_bytes: bool) {
        let mut bar = pbr::ProgressBar::new(total);
        if is_bytes {
            bar.set_units(pbr::Units::Bytes);
        }

        self.bar.lock().unwrap().replace(bar);
    }

    fn add_bar(&self, n: u64) {
        if let Some(bar) = self.bar.lock().unwrap().as_mut() {
            bar.add(n);
        }
    }

    fn shutdown_bar(&self) {
        let mut guard = self.bar.lock().unwrap();
        if let Some(bar) = guard.as_mut() {
            bar.finish();
        }
        guard.take();
    }
}

/// Storage handles for one state directory.
struct Environment {
    state_dir: PathBuf,
}

impl Environment {
    fn new(args: &ArgMatches) -> Self {
        let state_dir = PathBuf::from(
            args.value_of("state-dir")
                .expect("state-dir has a default value"),
        );

        Self { state_dir }
    }

    fn state_store(&self) -> Result<FileStateStore> {
        Ok(FileStateStore::new(self.state_dir.join("db"))?)
    }

    fn package_store(&self) -> Result<StatePackageStore<FileStateStore>> {
        Ok(StatePackageStore::new(self.state_store()?))
    }

    fn checksum_store(&self) -> Result<StateChecksumStore<FileStateStore>> {
        Ok(StateChecksumStore::new(self.state_store()?))
    }

    fn pool(&self) -> FilesystemPool {
        FilesystemPool::new(self.state_dir.join("pool"))
    }
}

pub async fn run_cli() -> Result<()> {
    let default_parallel = format!("{}", num_cpus::get());

    let app = Command::new("Debian Mirror Tool")
        .version("0.1")
        .about("Maintain partial mirrors of Debian repositories")
        .arg_required_else_help(true);

    let app = app
        .arg(
            Arg::new("state-dir")
                .long("--state-dir")
                .takes_value(true)
                .default_value("debian-mirror-state")
                .global(true)
                .help("Directory holding mirror state and the package pool"),
        )
        .arg(
            Arg::new("max-parallel-downloads")
                .long("--max-parallel-downloads")
                .takes_value(true)
                .default_value(&default_parallel)
                .global(true)
                .help("Maximum number of concurrent package downloads"),
        );

    let app = app.subcommand(
        Command::new("create-mirror")
            .about("Create a mirror from a YAML definition")
            .long_about(CREATE_MIRROR_ABOUT)
            .arg(
                Arg::new("yaml-config")
                    .long("--yaml-config")
                    .takes_value(true)
                    .required(true)
                    .allow_invalid_utf8(true)
                    .help("Path to a YAML file defining the mirror"),
            ),
    );

    let app = app.subcommand(
        Command::new("update-mirror")
            .about("Fetch new and updated packages for a mirror")
            .long_about(UPDATE_MIRROR_ABOUT)
            .arg(Arg::new("name").required(true).help("Name of the mirror"))
            .arg(
                Arg::new("force")
                    .long("--force")
                    .help("Take over the lock of a crashed update"),
            )
            .arg(
                Arg::new("redownload")
                    .long("--redownload")
                    .help("Fetch files even if the pool already holds them"),
            ),
    );

    let app = app.subcommand(
        Command::new("show-mirror")
            .about("Show a mirror's configuration, status, and package count")
            .arg(Arg::new("name").required(true).help("Name of the mirror")),
    );

    let app = app.subcommand(
        Command::new("drop-mirror")
            .about("Delete a mirror definition (pool content is kept; run cleanup)")
            .arg(Arg::new("name").required(true).help("Name of the mirror")),
    );

    let mut app = app.subcommand(
        Command::new("cleanup")
            .about("Delete packages and pool files no mirror references")
            .arg(
                Arg::new("mirror-names")
                    .takes_value(true)
                    .multiple_values(true)
                    .required(true)
                    .help("Names of all live mirrors"),
            )
            .arg(
                Arg::new("dry-run")
                    .long("--dry-run")
                    .help("Report what would be deleted without deleting"),
            ),
    );

    let matches = app.clone().get_matches();

    match matches.subcommand() {
        Some(("create-mirror", args)) => command_create_mirror(args),
        Some(("update-mirror", args)) => command_update_mirror(args).await,
        Some(("show-mirror", args)) => command_show_mirror(args),
        Some(("drop-mirror", args)) => command_drop_mirror(args),
        Some(("cleanup", args)) => command_cleanup(args),
        Some((command, _)) => Err(DmtError::InvalidSubCommand(command.to_string())),
        None => {
            app.print_help()?;
            Ok(())
        }
    }
}

fn command_create_mirror(args: &ArgMatches) -> Result<()> {
    let env = Environment::new(args);
    let state_store = env.state_store()?;

    let yaml_path = args
        .value_of_os("yaml-config")
        .expect("yaml-config argument is required");
    let f = std::fs::File::open(yaml_path)?;
    let config: MirrorConfig = serde_yaml::from_reader(f)?;

    if RemoteMirror::load(&config.name, &state_store).is_ok() {
        return Err(DmtError::MirrorExists(config.name));
    }

    let mut mirror = RemoteMirror::new(
        &config.name,
        &config.archive_root,
        &config.distribution,
        config.components,
        config.architectures,
    );
    mirror.filter = config.filter;
    mirror.filter_with_deps = config.filter_with_deps;
    mirror.save(&state_store)?;

    println!("mirror {} created", mirror.name);

    Ok(())
}

async fn command_update_mirror(args: &ArgMatches) -> Result<()> {
    let env = Environment::new(args);
    let state_store = env.state_store()?;
    let package_store = env.package_store()?;
    let checksum_store = env.checksum_store()?;
    let pool = env.pool();

    let name = args.value_of("name").expect("name argument is required");
    let concurrency = args.value_of_t::<usize>("max-parallel-downloads")?;

    let mut mirror = RemoteMirror::load(name, &state_store)?;

    let options = UpdateOptions {
        force: args.is_present("force"),
        skip_existing_packages: !args.is_present("redownload"),
        concurrency,
        dependency_options: DependencyOptions::default(),
    };

    let index_source = HttpPackageIndexSource::new(mirror.archive_url()?);
    let downloader = HttpDownloader::default();
    let progress = TerminalProgress::default();

    let cancel = CancelFlag::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("interrupt received, finishing in-flight downloads");
            signal_cancel.cancel();
        }
    });

    mirror
        .update(
            &index_source,
            &downloader,
            &pool,
            &package_store,
            &checksum_store,
            &state_store,
            &options,
            &cancel,
            &progress,
        )
        .await?;

    Ok(())
}

fn command_show_mirror(args: &ArgMatches) -> Result<()> {
    let env = Environment::new(args);
    let state_store = env.state_store()?;

    let name = args.value_of("name").expect("name argument is required");
    let mirror = RemoteMirror::load(name, &state_store)?;

    println!("name: {}", mirror.name);
    println!("archive root: {}", mirror.archive_root);
    println!("distribution: {}", mirror.distribution);
    println!("components: {}", mirror.components.join(", "));
    println!("architectures: {}", mirror.architectures.join(", "));
    if !mirror.filter.is_empty() {
        println!("filter: {}", mirror.filter.join(", "));
        println!("filter with dependencies: {}", mirror.filter_with_deps);
    }
    match mirror.status {
        MirrorStatus::Idle => println!("status: idle"),
        MirrorStatus::Updating { worker_pid } => {
            println!("status: updating (worker pid {})", worker_pid)
        }
    }
    println!("packages: {}", mirror.ref_list.len());

    Ok(())
}

fn command_drop_mirror(args: &ArgMatches) -> Result<()> {
    let env = Environment::new(args);
    let state_store = env.state_store()?;

    let name = args.value_of("name").expect("name argument is required");
    let mirror = RemoteMirror::load(name, &state_store)?;

    if matches!(mirror.status, MirrorStatus::Updating { .. }) {
        return Err(MirrorError::StateConflict(mirror.name).into());
    }

    mirror.delete(&state_store)?;
    println!("mirror {} dropped; run cleanup to reclaim pool space", name);

    Ok(())
}

fn command_cleanup(args: &ArgMatches) -> Result<()> {
    let env = Environment::new(args);
    let state_store = env.state_store()?;
    let package_store = env.package_store()?;
    let pool = env.pool();

    let names: Vec<&str> = args
        .values_of("mirror-names")
        .expect("mirror-names argument is required")
        .collect();
    let dry_run = args.is_present("dry-run");

    // Everything any live mirror references stays; every other package
    // record is garbage.
    let mut referenced = RefList::new();
    for name in names {
        let mirror = RemoteMirror::load(name, &state_store)?;
        referenced = referenced.merge(&mirror.ref_list, false, false);
    }

    let known = package_store.known_refs()?;

    let report = cleanup_unreferenced(
        &known,
        &referenced,
        &package_store,
        &state_store,
        &pool,
        dry_run,
        &TerminalProgress::default(),
    )?;

    println!(
        "{} package(s), {} file(s), {} byte(s){}",
        report.packages_removed,
        report.files_removed,
        report.bytes_freed,
        if dry_run { " (dry run)" } else { "" }
    );

    Ok(())
}
