use crate::os::{self, ThreadId};

/// The minimum and default number of inline hazard cells per thread record.
const MIN_INITIAL_HAZARD_COUNT: usize = 16;
/// Seed factor for the scan snapshot pre-reservation hint.
const SCAN_HINT_FACTOR: usize = 64;

////////////////////////////////////////////////////////////////////////////////////////////////////
// ConfigBuilder
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ConfigBuilder {
    initial_hazard_count: Option<usize>,
    is_thread_alive: Option<fn(ThreadId) -> bool>,
}

/********** impl inherent *************************************************************************/

impl ConfigBuilder {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of hazard cells embedded inline in every thread
    /// record.
    ///
    /// Values below the minimum of 16 are clamped.
    #[inline]
    pub fn initial_hazard_count(mut self, val: usize) -> Self {
        self.initial_hazard_count = Some(val);
        self
    }

    /// Installs the probe deciding whether the thread with the given id is
    /// still alive.
    ///
    /// Help-scan consults the probe in order to recover the retired pointers
    /// of threads that have terminated without detaching.
    /// If no reliable probe is available it must report every thread as
    /// alive (the default), in which case only explicitly detached records
    /// are recovered.
    #[inline]
    pub fn is_thread_alive(mut self, probe: fn(ThreadId) -> bool) -> Self {
        self.is_thread_alive = Some(probe);
        self
    }

    #[inline]
    pub fn build(self) -> Config {
        Config {
            initial_hazard_count: self
                .initial_hazard_count
                .map_or(MIN_INITIAL_HAZARD_COUNT, |count| count.max(MIN_INITIAL_HAZARD_COUNT)),
            is_thread_alive: self.is_thread_alive.unwrap_or(os::assume_thread_alive),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Config
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Runtime configuration for an [`Smr`][crate::Smr] instance.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// The number of hazard cells embedded inline in every thread record.
    pub initial_hazard_count: usize,
    /// The probe deciding whether the thread with the given id is alive.
    pub is_thread_alive: fn(ThreadId) -> bool,
}

/********** impl inherent *************************************************************************/

impl Config {
    /// Creates a `Config` with the given inline hazard cell count and
    /// defaults otherwise.
    #[inline]
    pub fn with_initial_hazard_count(val: usize) -> Self {
        ConfigBuilder::new().initial_hazard_count(val).build()
    }

    /// The initial snapshot-size hint handed to the first scan.
    #[inline]
    pub(crate) fn initial_scan_hint(&self) -> usize {
        self.initial_hazard_count * SCAN_HINT_FACTOR
    }
}

/********** impl Default **************************************************************************/

impl Default for Config {
    #[inline]
    fn default() -> Self {
        ConfigBuilder::new().build()
    }
}
