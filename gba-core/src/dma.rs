use std::ops::RangeInclusive;

use crate::{BitManipulation, DataAccess};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressControl {
    Increment,
    Decrement,
    Fixed,
    IncrementReload,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferUnit {
    Halfword,
    Word,
}

impl TransferUnit {
    pub fn size(self) -> u32 {
        match self {
            TransferUnit::Halfword => 2,
            TransferUnit::Word => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartTiming {
    Immediate,
    VBlank,
    HBlank,
    Special,
}

// One DMA channel: the guest-visible registers plus the internal running
// copies latched on the enable edge.
#[derive(Clone, Debug)]
pub struct DmaChannel {
    source: u32,
    source_mask: u32,
    dest: u32,
    dest_mask: u32,
    word_count: u16,
    word_count_mask: u16,
    control: u16,

    internal_source: u32,
    internal_dest: u32,
    internal_count: u32,
    active: bool,
}

impl DmaChannel {
    const DEST_CONTROL_BIT_RANGE: RangeInclusive<usize> = 5..=6;
    const SOURCE_CONTROL_BIT_RANGE: RangeInclusive<usize> = 7..=8;
    const REPEAT_BIT_INDEX: usize = 9;
    const TRANSFER_UNIT_BIT_INDEX: usize = 10;
    const START_TIMING_BIT_RANGE: RangeInclusive<usize> = 12..=13;
    const IRQ_AT_END_BIT_INDEX: usize = 14;
    const ENABLE_BIT_INDEX: usize = 15;

    pub fn new(index: usize) -> Self {
        // Channel 0 may not touch the cartridge space; only channel 3 has the
        // full 16-bit word count and a 28-bit destination.
        let (source_mask, dest_mask, word_count_mask) = match index {
            0 => (0x07FF_FFFF, 0x07FF_FFFF, 0x3FFF),
            1 | 2 => (0x0FFF_FFFF, 0x07FF_FFFF, 0x3FFF),
            3 => (0x0FFF_FFFF, 0x0FFF_FFFF, 0xFFFF),
            _ => unreachable!(),
        };

        Self {
            source: 0,
            source_mask,
            dest: 0,
            dest_mask,
            word_count: 0,
            word_count_mask,
            control: 0,

            internal_source: 0,
            internal_dest: 0,
            internal_count: 0,
            active: false,
        }
    }

    pub fn write_source<T>(&mut self, value: T, index: u32)
    where
        u32: DataAccess<T>,
    {
        self.source = self.source.set_data(value, index) & self.source_mask;
    }

    pub fn write_dest<T>(&mut self, value: T, index: u32)
    where
        u32: DataAccess<T>,
    {
        self.dest = self.dest.set_data(value, index) & self.dest_mask;
    }

    pub fn write_word_count<T>(&mut self, value: T, index: u32)
    where
        u16: DataAccess<T>,
    {
        self.word_count = self.word_count.set_data(value, index) & self.word_count_mask;
    }

    pub fn read_control<T>(&self, index: u32) -> T
    where
        u16: DataAccess<T>,
    {
        self.control.get_data(index)
    }

    pub fn write_control<T>(&mut self, value: T, index: u32)
    where
        u16: DataAccess<T>,
    {
        let old_enabled = self.enabled();
        self.control = self.control.set_data(value, index);

        // The enable rising edge latches the running copies; immediate
        // transfers activate at once, everything else waits for its trigger.
        if !old_enabled && self.enabled() {
            self.latch();

            if self.start_timing() == StartTiming::Immediate {
                self.active = true;
            }
        }

        if !self.enabled() {
            self.active = false;
        }
    }

    fn latch(&mut self) {
        self.internal_source = self.source;
        self.internal_dest = self.dest;
        self.internal_count = self.effective_word_count();
    }

    // A zero word count means the channel's maximum.
    fn effective_word_count(&self) -> u32 {
        if self.word_count == 0 {
            u32::from(self.word_count_mask) + 1
        } else {
            u32::from(self.word_count)
        }
    }

    pub fn trigger(&mut self, timing: StartTiming) {
        if self.enabled() && !self.active && self.start_timing() == timing {
            self.active = true;
        }
    }

    // Called by the bus transfer loop after the last unit has moved.
    pub fn finish_transfer(&mut self) {
        self.active = false;

        if self.repeat() && self.start_timing() != StartTiming::Immediate {
            self.internal_count = self.effective_word_count();
            if self.dest_control() == AddressControl::IncrementReload {
                self.internal_dest = self.dest;
            }
        } else {
            self.control = self.control.set_bit(Self::ENABLE_BIT_INDEX, false);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn enabled(&self) -> bool {
        self.control.get_bit(Self::ENABLE_BIT_INDEX)
    }

    pub fn irq_at_end(&self) -> bool {
        self.control.get_bit(Self::IRQ_AT_END_BIT_INDEX)
    }

    pub fn repeat(&self) -> bool {
        self.control.get_bit(Self::REPEAT_BIT_INDEX)
    }

    pub fn transfer_unit(&self) -> TransferUnit {
        if self.control.get_bit(Self::TRANSFER_UNIT_BIT_INDEX) {
            TransferUnit::Word
        } else {
            TransferUnit::Halfword
        }
    }

    pub fn start_timing(&self) -> StartTiming {
        match self.control.get_bit_range(Self::START_TIMING_BIT_RANGE) {
            0 => StartTiming::Immediate,
            1 => StartTiming::VBlank,
            2 => StartTiming::HBlank,
            3 => StartTiming::Special,
            _ => unreachable!(),
        }
    }

    pub fn source_control(&self) -> AddressControl {
        match self.control.get_bit_range(Self::SOURCE_CONTROL_BIT_RANGE) {
            0 => AddressControl::Increment,
            1 => AddressControl::Decrement,
            2 => AddressControl::Fixed,
            // Increment-reload is illegal for the source side; treat it as a
            // plain increment.
            3 => AddressControl::Increment,
            _ => unreachable!(),
        }
    }

    pub fn dest_control(&self) -> AddressControl {
        match self.control.get_bit_range(Self::DEST_CONTROL_BIT_RANGE) {
            0 => AddressControl::Increment,
            1 => AddressControl::Decrement,
            2 => AddressControl::Fixed,
            3 => AddressControl::IncrementReload,
            _ => unreachable!(),
        }
    }

    pub fn internal_source(&self) -> u32 {
        self.internal_source
    }

    pub fn internal_dest(&self) -> u32 {
        self.internal_dest
    }

    pub fn internal_count(&self) -> u32 {
        self.internal_count
    }

    pub fn dest(&self) -> u32 {
        self.dest
    }

    // Sound FIFO service: words move from an advancing source to a fixed
    // destination without consuming the word count.
    pub fn advance_fifo_word(&mut self) {
        self.internal_source = match self.source_control() {
            AddressControl::Increment | AddressControl::IncrementReload => {
                self.internal_source.wrapping_add(4)
            }
            AddressControl::Decrement => self.internal_source.wrapping_sub(4),
            AddressControl::Fixed => self.internal_source,
        };
    }

    pub fn advance(&mut self, units_moved: u32) {
        let size = self.transfer_unit().size();

        self.internal_source = match self.source_control() {
            AddressControl::Increment | AddressControl::IncrementReload => {
                self.internal_source.wrapping_add(size * units_moved)
            }
            AddressControl::Decrement => self.internal_source.wrapping_sub(size * units_moved),
            AddressControl::Fixed => self.internal_source,
        };

        self.internal_dest = match self.dest_control() {
            AddressControl::Increment | AddressControl::IncrementReload => {
                self.internal_dest.wrapping_add(size * units_moved)
            }
            AddressControl::Decrement => self.internal_dest.wrapping_sub(size * units_moved),
            AddressControl::Fixed => self.internal_dest,
        };

        self.internal_count -= units_moved;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enable_edge_latches_and_activates_immediate() {
        let mut channel = DmaChannel::new(0);
        channel.write_source(0x0200_0000u32, 0);
        channel.write_dest(0x0200_1000u32, 0);
        channel.write_word_count(16u16, 0);
        channel.write_control(0x8000u16, 0);

        assert!(channel.is_active());
        assert_eq!(channel.internal_source(), 0x0200_0000);
        assert_eq!(channel.internal_dest(), 0x0200_1000);
        assert_eq!(channel.internal_count(), 16);
    }

    #[test]
    fn vblank_timing_waits_for_trigger() {
        let mut channel = DmaChannel::new(1);
        channel.write_control(0x9000u16, 0); // enable, VBlank timing
        assert!(!channel.is_active());

        channel.trigger(StartTiming::HBlank);
        assert!(!channel.is_active());

        channel.trigger(StartTiming::VBlank);
        assert!(channel.is_active());
    }

    #[test]
    fn zero_count_means_channel_maximum() {
        let mut channel = DmaChannel::new(3);
        channel.write_control(0x8000u16, 0);
        assert_eq!(channel.internal_count(), 0x1_0000);

        let mut channel = DmaChannel::new(0);
        channel.write_control(0x8000u16, 0);
        assert_eq!(channel.internal_count(), 0x4000);
    }

    #[test]
    fn source_addresses_are_masked() {
        let mut channel = DmaChannel::new(0);
        channel.write_source(0xFFFF_FFFFu32, 0);
        channel.write_control(0x8000u16, 0);
        assert_eq!(channel.internal_source(), 0x07FF_FFFF);
    }

    #[test]
    fn completion_clears_enable_unless_repeat() {
        let mut channel = DmaChannel::new(0);
        channel.write_word_count(4u16, 0);
        channel.write_control(0x8000u16, 0);
        channel.advance(4);
        channel.finish_transfer();
        assert!(!channel.enabled());

        // Repeat with HBlank timing re-latches the count and stays enabled.
        let mut channel = DmaChannel::new(0);
        channel.write_word_count(4u16, 0);
        channel.write_control(0xA200u16, 0); // enable, repeat, hblank
        channel.trigger(StartTiming::HBlank);
        channel.advance(4);
        channel.finish_transfer();
        assert!(channel.enabled());
        assert!(!channel.is_active());
        assert_eq!(channel.internal_count(), 4);
    }
}
