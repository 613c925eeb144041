// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use libdd_mlpd_protocol::wire::BUFFER_SIZE;
use libdd_mlpd_protocol::{BufferHeader, Event, EventEncoder};
use std::io::{self, Write};

/// One buffer record in the making: the encoded payload and the encoder state its deltas are
/// relative to.
///
/// Full buffers are not written out right away. [`LogBuffer::ensure`] links them behind a fresh
/// one through `next`, and the whole chain travels to the writer together.
#[derive(Debug)]
pub struct LogBuffer {
    encoder: EventEncoder,
    thread_id: u64,
    data: Vec<u8>,
    capacity: usize,
    next: Option<Box<LogBuffer>>,
}

impl LogBuffer {
    /// A buffer able to hold at least `min_bytes`.
    pub fn new(thread_id: u64, time_base: u64, min_bytes: usize) -> Box<Self> {
        let capacity = BUFFER_SIZE.max(min_bytes + 1);
        Box::new(Self {
            encoder: EventEncoder::new(time_base),
            thread_id,
            data: Vec::with_capacity(capacity),
            capacity,
            next: None,
        })
    }

    /// Makes sure the head of the chain can take `bytes` more, starting a new head buffer
    /// stamped with `now` when it cannot. Returns whether a buffer was started.
    pub fn ensure(head: &mut Box<LogBuffer>, bytes: usize, now: u64) -> bool {
        if head.data.len() + bytes < head.capacity {
            return false;
        }
        let fresh = LogBuffer::new(head.thread_id, now, bytes);
        let full = std::mem::replace(head, fresh);
        head.next = Some(full);
        true
    }

    /// Encodes `event`. The caller reserved [`Event::max_encoded_len`] through
    /// [`LogBuffer::ensure`].
    pub fn write(&mut self, time: u64, event: &Event) {
        let budget = event.max_encoded_len();
        debug_assert!(self.data.len() + budget < self.capacity);
        let before = self.data.len();
        self.encoder.encode(time, event, &mut self.data);
        debug_assert!(
            self.data.len() - before <= budget,
            "{event:?} wrote more than its budget of {budget} bytes"
        );
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }

    pub fn thread_id(&self) -> u64 {
        self.thread_id
    }

    pub fn header(&self) -> BufferHeader {
        BufferHeader {
            len: self.data.len() as u32,
            time_base: self.encoder.time_base(),
            ptr_base: self.encoder.ptr_base(),
            obj_base: self.encoder.obj_base(),
            thread_id: self.thread_id,
            method_base: self.encoder.method_base(),
        }
    }

    /// Writes the chain as buffer records, oldest buffer first. Empty buffers are skipped.
    pub fn write_chain<W: Write>(self: Box<Self>, w: &mut W) -> io::Result<()> {
        let mut chain = Vec::new();
        let mut cursor = Some(self);
        while let Some(mut buffer) = cursor {
            cursor = buffer.next.take();
            chain.push(buffer);
        }
        for buffer in chain.iter().rev().filter(|b| !b.is_empty()) {
            buffer.header().write_to(w)?;
            w.write_all(&buffer.data)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libdd_mlpd_protocol::wire::LOG_DATA_VERSION;
    use libdd_mlpd_protocol::{read_buffer, Decoded, EventDecoder};

    #[test]
    fn overflow_links_a_new_head() {
        let mut head = LogBuffer::new(7, 100, 0);
        let name = "x".repeat(40_000);
        for time in [110, 120] {
            let event = Event::ThreadName {
                thread_id: 7,
                name: name.clone(),
            };
            LogBuffer::ensure(&mut head, event.max_encoded_len(), time);
            head.write(time, &event);
        }
        assert!(head.has_next());
        assert_eq!(head.header().time_base, 120);

        let mut out = Vec::new();
        head.write_chain(&mut out).unwrap();
        let mut r = &out[..];
        let mut times = Vec::new();
        while let Some((header, payload)) = read_buffer(&mut r).unwrap() {
            assert_eq!(header.thread_id, 7);
            for record in EventDecoder::new(LOG_DATA_VERSION, &header)
                .decode_all(&payload)
                .unwrap()
            {
                assert!(matches!(record.event, Decoded::Current(Event::ThreadName { .. })));
                times.push(record.time);
            }
        }
        assert_eq!(times, [110, 120]);
    }

    #[test]
    fn oversized_event_gets_its_own_buffer() {
        let mut head = LogBuffer::new(1, 0, 0);
        let event = Event::AotId {
            id: "a".repeat(BUFFER_SIZE * 2),
        };
        LogBuffer::ensure(&mut head, event.max_encoded_len(), 5);
        head.write(5, &event);
        assert!(head.len() > BUFFER_SIZE);
    }

    #[test]
    fn empty_buffers_are_skipped() {
        let mut head = LogBuffer::new(1, 0, 0);
        assert!(LogBuffer::ensure(&mut head, BUFFER_SIZE, 5));
        assert!(head.has_next());
        head.write(6, &Event::HeapStart);

        let mut out = Vec::new();
        head.write_chain(&mut out).unwrap();
        let mut r = &out[..];
        assert!(read_buffer(&mut r).unwrap().is_some());
        assert!(read_buffer(&mut r).unwrap().is_none());
    }

    proptest::proptest! {
        #[test]
        fn chains_keep_event_order(
            gaps in proptest::collection::vec(0u64..1_000_000, 1..64),
            name_len in 0usize..8_000,
        ) {
            let mut head = LogBuffer::new(3, 0, 0);
            let mut time = 0;
            let mut expected = Vec::new();
            for gap in gaps {
                time += gap;
                let event = Event::ThreadName {
                    thread_id: 3,
                    name: "n".repeat(name_len),
                };
                LogBuffer::ensure(&mut head, event.max_encoded_len(), time);
                head.write(time, &event);
                expected.push(time);
            }

            let mut out = Vec::new();
            head.write_chain(&mut out).unwrap();
            let mut r = &out[..];
            let mut times = Vec::new();
            while let Some((header, payload)) = read_buffer(&mut r).unwrap() {
                for record in EventDecoder::new(LOG_DATA_VERSION, &header)
                    .decode_all(&payload)
                    .unwrap()
                {
                    times.push(record.time);
                }
            }
            proptest::prop_assert_eq!(times, expected);
        }
    }

    #[test]
    fn budget_holds_for_arbitrary_names() {
        bolero::check!()
            .with_type::<(String, Vec<u64>)>()
            .for_each(|(name, frames)| {
                let mut head = LogBuffer::new(1, 0, 0);
                let frames: Vec<u64> = frames.iter().take(32).copied().collect();
                let events = [
                    Event::ClassLoad {
                        klass: frames.first().copied().unwrap_or(0),
                        image: 0x2000,
                        name: name.clone(),
                    },
                    Event::Alloc {
                        vtable: 0x1000,
                        obj: 0x7f00_0000_0008,
                        size: 24,
                        backtrace: Some(frames.clone()),
                    },
                ];
                for event in &events {
                    LogBuffer::ensure(&mut head, event.max_encoded_len(), 1);
                    head.write(1, event);
                }
            });
    }
}
