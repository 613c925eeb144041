// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bitflags::bitflags;
use libdd_mlpd_protocol::wire::MAX_FRAMES;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Event classes the profiler records.
    ///
    /// Metadata (domain, assembly, module, class, thread, context) is always written because the
    /// other events point at it; those bits are carried so masks survive a round trip through
    /// configuration files.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct EventMask: u32 {
        const DOMAIN = 1 << 0;
        const ASSEMBLY = 1 << 1;
        const MODULE = 1 << 2;
        const CLASS = 1 << 3;
        const JIT = 1 << 4;
        const EXCEPTION = 1 << 5;
        const ALLOC = 1 << 6;
        const GC = 1 << 7;
        const THREAD = 1 << 8;
        const CALL = 1 << 9;
        const SAMPLE = 1 << 10;
        const MONITOR = 1 << 11;
        const GC_MOVE = 1 << 12;
        const GC_ROOT = 1 << 13;
        const CONTEXT = 1 << 14;
        const FINALIZATION = 1 << 15;
        const COUNTER = 1 << 16;
        const GC_HANDLE = 1 << 17;

        /// Any of these makes GC pauses bracketed by world stop/start sync points.
        const ALL_GC = Self::GC.bits()
            | Self::GC_MOVE.bits()
            | Self::GC_ROOT.bits();
        const METADATA = Self::DOMAIN.bits()
            | Self::ASSEMBLY.bits()
            | Self::MODULE.bits()
            | Self::CLASS.bits()
            | Self::THREAD.bits()
            | Self::CONTEXT.bits();
    }
}

impl Default for EventMask {
    fn default() -> Self {
        EventMask::METADATA
            | EventMask::JIT
            | EventMask::EXCEPTION
            | EventMask::MONITOR
            | EventMask::GC
            | EventMask::GC_MOVE
            | EventMask::GC_ROOT
            | EventMask::GC_HANDLE
            | EventMask::FINALIZATION
            | EventMask::COUNTER
    }
}

/// When the heap is walked during a collection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeapshotMode {
    #[default]
    None,
    /// After every major collection.
    Major,
    /// Only when requested, through the API or the `heapshot` command.
    OnDemand,
    /// After every n-th collection.
    EveryGcs(u32),
    /// After the first collection at least this many milliseconds after the previous shot.
    EveryMillis(u64),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    pub events: EventMask,
    /// Frames captured per backtrace, at most [`MAX_FRAMES`]. Zero disables backtraces.
    pub num_frames: usize,
    pub max_call_depth: u32,
    /// Record method enter and leave events.
    pub enter_leave: bool,
    pub heapshot: HeapshotMode,
    pub heapshot_on_shutdown: bool,
    /// Report GC roots on every collection instead of only with heap shots.
    pub always_do_root_report: bool,
    /// Upper bound of in-flight sample hits; further hits are dropped.
    pub max_allocated_sample_hits: u32,
    pub sampling_mode: Option<String>,
    pub sample_freq: u32,
    /// Output target, see [`crate::sink::OutputSink::open`]. `None` writes `output.mlpd`.
    pub output: Option<String>,
    pub use_zip: bool,
    /// Pipe the stream into `mprof-report` instead of keeping it.
    pub report: bool,
    /// Port of the command server; zero picks any free port.
    pub command_port: u16,
    /// Profiler argument string recorded in the file header.
    pub args: String,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            events: EventMask::default(),
            num_frames: MAX_FRAMES,
            max_call_depth: 100,
            enter_leave: false,
            heapshot: HeapshotMode::None,
            heapshot_on_shutdown: false,
            always_do_root_report: false,
            max_allocated_sample_hits: 512,
            sampling_mode: None,
            sample_freq: 100,
            output: None,
            use_zip: false,
            report: false,
            command_port: 0,
            args: String::new(),
        }
    }
}

impl ProfilerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.num_frames <= MAX_FRAMES,
            "num_frames is {} but at most {MAX_FRAMES} frames are supported",
            self.num_frames
        );
        match self.heapshot {
            HeapshotMode::EveryGcs(0) => {
                anyhow::bail!("heapshot collection frequency must be non-zero")
            }
            HeapshotMode::EveryMillis(0) => {
                anyhow::bail!("heapshot millisecond frequency must be non-zero")
            }
            _ => {}
        }
        anyhow::ensure!(
            !self.events.contains(EventMask::SAMPLE) || self.max_allocated_sample_hits > 0,
            "sampling is enabled but max_allocated_sample_hits is zero"
        );
        Ok(())
    }

    /// Event mask that is effectively in use: calls are only recorded with enter/leave
    /// instrumentation.
    pub fn effective_events(&self) -> EventMask {
        let mut events = self.events;
        events.set(EventMask::CALL, self.enter_leave);
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = ProfilerConfig::default();
        config.validate().unwrap();
        assert!(!config.effective_events().contains(EventMask::CALL));
    }

    #[test]
    fn rejects_bad_values() {
        let too_deep = ProfilerConfig {
            num_frames: MAX_FRAMES + 1,
            ..Default::default()
        };
        assert!(too_deep.validate().is_err());

        let zero_freq = ProfilerConfig {
            heapshot: HeapshotMode::EveryGcs(0),
            ..Default::default()
        };
        assert!(zero_freq.validate().is_err());

        let no_samples = ProfilerConfig {
            events: EventMask::SAMPLE,
            max_allocated_sample_hits: 0,
            ..Default::default()
        };
        assert!(no_samples.validate().is_err());
    }

    #[test]
    fn serde_round_trip() {
        let config = ProfilerConfig {
            events: EventMask::ALLOC | EventMask::GC,
            heapshot: HeapshotMode::EveryMillis(1000),
            output: Some("|gzip > out.mlpd.gz".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let read: ProfilerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(read, config);

        let partial: ProfilerConfig = serde_json::from_str(r#"{"enter_leave": true}"#).unwrap();
        assert!(partial.enter_leave);
        assert_eq!(partial.num_frames, MAX_FRAMES);
    }
}
