// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Progress reporting.

Long running operations report through a [Progress] sink. Reporting is
purely informational: no control flow anywhere depends on what a sink does
with the calls. The default implementations discard everything, so custom
sinks only override what they present.
*/

/// Receiver for operation progress.
pub trait Progress: Send + Sync {
    /// Print an informational message.
    fn printf(&self, _msg: &str) {}

    /// Print a highlighted informational message.
    fn colored_printf(&self, msg: &str) {
        self.printf(msg)
    }

    /// Begin a progress bar with the given total.
    ///
    /// `is_bytes` indicates the unit is bytes rather than item counts.
    fn init_bar(&self, _total: u64, _is_bytes: bool) {}

    /// Advance the progress bar.
    fn add_bar(&self, _n: u64) {}

    /// Tear down the progress bar.
    fn shutdown_bar(&self) {}
}

/// A [Progress] sink that discards all reporting.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullProgress;

impl Progress for NullProgress {}
