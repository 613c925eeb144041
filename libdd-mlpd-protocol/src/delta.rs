// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delta compression of pointer-like values.
//!
//! Each buffer latches the first value it sees of a category as that category's base. Later
//! values are written as signed differences, either from the base ([`DeltaMode::Anchored`],
//! pointers and objects) or from the previous value ([`DeltaMode::Chained`], methods). The base
//! never changes for the lifetime of the buffer and is written into the buffer record header.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeltaMode {
    Anchored,
    Chained,
}

#[derive(Clone, Debug)]
pub struct DeltaEncoder {
    mode: DeltaMode,
    base: Option<u64>,
    last: u64,
}

impl DeltaEncoder {
    pub const fn new(mode: DeltaMode) -> Self {
        Self {
            mode,
            base: None,
            last: 0,
        }
    }

    pub const fn anchored() -> Self {
        Self::new(DeltaMode::Anchored)
    }

    pub const fn chained() -> Self {
        Self::new(DeltaMode::Chained)
    }

    /// Returns the delta to write for `value`, latching it as the base if no value was seen yet.
    pub fn first_or_delta(&mut self, value: u64) -> i64 {
        let Some(base) = self.base else {
            self.base = Some(value);
            self.last = value;
            return 0;
        };
        let reference = match self.mode {
            DeltaMode::Anchored => base,
            DeltaMode::Chained => self.last,
        };
        self.last = value;
        value.wrapping_sub(reference) as i64
    }

    /// The latched base, or 0 when no value was encoded.
    pub fn base(&self) -> u64 {
        self.base.unwrap_or(0)
    }

    pub fn is_latched(&self) -> bool {
        self.base.is_some()
    }
}

/// Reverses a [`DeltaEncoder`] given the base stored in the buffer header.
#[derive(Clone, Debug)]
pub struct DeltaDecoder {
    mode: DeltaMode,
    base: u64,
    current: u64,
}

impl DeltaDecoder {
    pub const fn new(mode: DeltaMode, base: u64) -> Self {
        Self {
            mode,
            base,
            current: base,
        }
    }

    pub fn apply(&mut self, delta: i64) -> u64 {
        match self.mode {
            DeltaMode::Anchored => self.base.wrapping_add_signed(delta),
            DeltaMode::Chained => {
                self.current = self.current.wrapping_add_signed(delta);
                self.current
            }
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(mode: DeltaMode, values: &[u64]) {
        let mut encoder = DeltaEncoder::new(mode);
        let deltas: Vec<i64> = values.iter().map(|v| encoder.first_or_delta(*v)).collect();
        let mut decoder = DeltaDecoder::new(mode, encoder.base());
        let decoded: Vec<u64> = deltas.iter().map(|d| decoder.apply(*d)).collect();
        assert_eq!(decoded, values);
    }

    #[test]
    fn base_latches_on_first_value() {
        let mut encoder = DeltaEncoder::anchored();
        assert!(!encoder.is_latched());
        assert_eq!(encoder.base(), 0);
        assert_eq!(encoder.first_or_delta(0x2000), 0);
        assert_eq!(encoder.first_or_delta(0x1000), -0x1000);
        assert_eq!(encoder.first_or_delta(0x3000), 0x1000);
        assert_eq!(encoder.base(), 0x2000);
    }

    #[test]
    fn chained_deltas_follow_previous_value() {
        let mut encoder = DeltaEncoder::chained();
        assert_eq!(encoder.first_or_delta(100), 0);
        assert_eq!(encoder.first_or_delta(150), 50);
        assert_eq!(encoder.first_or_delta(120), -30);
        assert_eq!(encoder.base(), 100);
    }

    #[test]
    fn extremes() {
        round_trip(DeltaMode::Anchored, &[u64::MAX, 0, 1, u64::MAX / 2]);
        round_trip(DeltaMode::Chained, &[0, u64::MAX, 7, u64::MAX - 7]);
    }

    #[test]
    fn fuzz_idempotence() {
        bolero::check!()
            .with_type::<(bool, Vec<u64>)>()
            .for_each(|(chained, values)| {
                let mode = if *chained {
                    DeltaMode::Chained
                } else {
                    DeltaMode::Anchored
                };
                round_trip(mode, values);
            });
    }
}
