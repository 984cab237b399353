// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian repository mirroring.

This crate implements the machinery for maintaining partial local mirrors
of remote Debian repositories: fetching binary package indices, selecting
packages (optionally with dependency closures), downloading package files
with bounded concurrency into a content-addressed pool, and tracking it
all through durable, crash-evident mirror state.

The main moving parts:

* [reflist::RefList] — ordered sets of package reference keys with linear
  merge/subtract/diff algebra. The durable currency of the system.
* [package_list::PackageList] — materialized package collections with
  indexed queries, filtering, and dependency resolution.
* [download] — deduplicated download planning and a concurrent executor
  with cooperative cancellation and aggregate failure reporting.
* [mirror::RemoteMirror] — the mirror entity and its update workflow,
  locked through a persisted Idle/Updating state machine.
* [pool] and [store] — content-addressed file storage and the storage
  collaborator traits everything above is written against.

Persistence and transport are specified as traits, so tests run entirely
in memory and the HTTP layer (behind the `http` feature) is just one
implementation among others.
*/

pub mod checksum;
pub mod cleanup;
pub mod dependency;
pub mod download;
pub mod error;
#[cfg(feature = "http")]
pub mod http;
pub mod index;
pub mod mirror;
pub mod package;
pub mod package_list;
pub mod package_version;
pub mod pool;
pub mod progress;
pub mod reflist;
pub mod store;
