use std::collections::VecDeque;

use crate::{BitManipulation, DataAccess};

pub const SAMPLE_RATE: u32 = 32_768;

const CYCLES_PER_SAMPLE: u32 = 512; // 16.777216 MHz / 32768 Hz
const SAMPLE_BUFFER_FRAMES: usize = 4096;
const FIFO_CAPACITY: usize = 32;
const FIFO_REFILL_THRESHOLD: usize = 16;

// Direct-sound byte FIFO. Word writes from the bus arrive as four byte
// pushes; overflowing bytes are dropped.
#[derive(Clone, Debug, Default)]
struct Fifo {
    buffer: VecDeque<u8>,
}

impl Fifo {
    fn push(&mut self, value: u8) {
        if self.buffer.len() < FIFO_CAPACITY {
            self.buffer.push_back(value);
        } else {
            log::debug!("dropping byte pushed to a full sound FIFO");
        }
    }

    fn pop(&mut self) -> Option<u8> {
        self.buffer.pop_front()
    }

    fn len(&self) -> usize {
        self.buffer.len()
    }

    fn clear(&mut self) {
        self.buffer.clear();
    }
}

// Behavioural APU: the register file is guest-visible and the direct-sound
// FIFO path is wired up, but the PSG channels produce silence.
#[derive(Clone, Debug)]
pub struct Apu {
    channel_registers: [u16; 16], // 0x060..=0x07F as halfwords
    control_stereo: u16,          // SOUNDCNT_L
    control_mixing: u16,          // SOUNDCNT_H
    control_enable: u16,          // SOUNDCNT_X
    sound_bias: u16,
    wave_ram: [u8; 16],

    fifo_a: Fifo,
    fifo_b: Fifo,
    sample_a: i8,
    sample_b: i8,

    sample_phase: u32,
    samples: VecDeque<i16>,
}

impl Default for Apu {
    fn default() -> Self {
        Self {
            channel_registers: [0; 16],
            control_stereo: 0,
            control_mixing: 0,
            control_enable: 0,
            sound_bias: 0x0200,
            wave_ram: [0; 16],

            fifo_a: Fifo::default(),
            fifo_b: Fifo::default(),
            sample_a: 0,
            sample_b: 0,

            sample_phase: 0,
            samples: VecDeque::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FifoDmaRequest {
    pub fifo_a: bool,
    pub fifo_b: bool,
}

impl Apu {
    const MASTER_ENABLE_BIT_INDEX: usize = 7;

    const FIFO_A_VOLUME_BIT_INDEX: usize = 2;
    const FIFO_B_VOLUME_BIT_INDEX: usize = 3;
    const FIFO_A_ENABLE_RIGHT_BIT_INDEX: usize = 8;
    const FIFO_A_ENABLE_LEFT_BIT_INDEX: usize = 9;
    const FIFO_A_TIMER_SELECT_BIT_INDEX: usize = 10;
    const FIFO_A_RESET_BIT_INDEX: usize = 11;
    const FIFO_B_ENABLE_RIGHT_BIT_INDEX: usize = 12;
    const FIFO_B_ENABLE_LEFT_BIT_INDEX: usize = 13;
    const FIFO_B_TIMER_SELECT_BIT_INDEX: usize = 14;
    const FIFO_B_RESET_BIT_INDEX: usize = 15;

    pub fn step(&mut self, cycles: u32) {
        self.sample_phase += cycles;

        while self.sample_phase >= CYCLES_PER_SAMPLE {
            self.sample_phase -= CYCLES_PER_SAMPLE;
            self.generate_sample();
        }
    }

    fn generate_sample(&mut self) {
        let (left, right) = if self.master_enabled() {
            self.mix_output()
        } else {
            (0, 0)
        };

        // Degrade silently when the host is not draining.
        if self.samples.len() < SAMPLE_BUFFER_FRAMES * 2 {
            self.samples.push_back(left);
            self.samples.push_back(right);
        }
    }

    fn mix_output(&self) -> (i16, i16) {
        let mut left = 0i32;
        let mut right = 0i32;

        let sample_a = i32::from(self.sample_a) << 6;
        let sample_a = if self.control_mixing.get_bit(Self::FIFO_A_VOLUME_BIT_INDEX) {
            sample_a
        } else {
            sample_a / 2
        };

        let sample_b = i32::from(self.sample_b) << 6;
        let sample_b = if self.control_mixing.get_bit(Self::FIFO_B_VOLUME_BIT_INDEX) {
            sample_b
        } else {
            sample_b / 2
        };

        if self.control_mixing.get_bit(Self::FIFO_A_ENABLE_LEFT_BIT_INDEX) {
            left += sample_a;
        }
        if self.control_mixing.get_bit(Self::FIFO_A_ENABLE_RIGHT_BIT_INDEX) {
            right += sample_a;
        }
        if self.control_mixing.get_bit(Self::FIFO_B_ENABLE_LEFT_BIT_INDEX) {
            left += sample_b;
        }
        if self.control_mixing.get_bit(Self::FIFO_B_ENABLE_RIGHT_BIT_INDEX) {
            right += sample_b;
        }

        (
            left.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16,
            right.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16,
        )
    }

    // Timer 0 or 1 overflowed; pop the FIFOs clocked by that timer and report
    // which ones have drained low enough to want sound DMA.
    pub fn clock_fifo(&mut self, timer_index: usize) -> FifoDmaRequest {
        let mut request = FifoDmaRequest::default();

        if !self.master_enabled() {
            return request;
        }

        let timer_a = usize::from(
            self.control_mixing
                .get_bit(Self::FIFO_A_TIMER_SELECT_BIT_INDEX),
        );
        if timer_a == timer_index {
            if let Some(value) = self.fifo_a.pop() {
                self.sample_a = value as i8;
            }
            request.fifo_a = self.fifo_a.len() <= FIFO_REFILL_THRESHOLD;
        }

        let timer_b = usize::from(
            self.control_mixing
                .get_bit(Self::FIFO_B_TIMER_SELECT_BIT_INDEX),
        );
        if timer_b == timer_index {
            if let Some(value) = self.fifo_b.pop() {
                self.sample_b = value as i8;
            }
            request.fifo_b = self.fifo_b.len() <= FIFO_REFILL_THRESHOLD;
        }

        request
    }

    pub fn take_samples(&mut self) -> Vec<i16> {
        self.samples.drain(..).collect()
    }

    fn master_enabled(&self) -> bool {
        self.control_enable.get_bit(Self::MASTER_ENABLE_BIT_INDEX)
    }

    // MMIO offsets relative to 0x0400_0000.
    const CHANNEL_REGISTERS_BASE: u32 = 0x060;
    const CHANNEL_REGISTERS_END: u32 = 0x07F;
    const CONTROL_STEREO_BASE: u32 = 0x080;
    const CONTROL_MIXING_BASE: u32 = 0x082;
    const CONTROL_ENABLE_BASE: u32 = 0x084;
    const SOUND_BIAS_BASE: u32 = 0x088;
    const WAVE_RAM_BASE: u32 = 0x090;
    const WAVE_RAM_END: u32 = 0x09F;
    const FIFO_A_BASE: u32 = 0x0A0;
    const FIFO_A_END: u32 = 0x0A3;
    const FIFO_B_BASE: u32 = 0x0A4;
    const FIFO_B_END: u32 = 0x0A7;

    pub fn read_register_byte(&self, offset: u32) -> u8 {
        match offset {
            Self::CHANNEL_REGISTERS_BASE..=Self::CHANNEL_REGISTERS_END => {
                let register = ((offset - Self::CHANNEL_REGISTERS_BASE) / 2) as usize;
                self.channel_registers[register].get_data(offset & 0b1)
            }
            Self::CONTROL_STEREO_BASE => self.control_stereo.get_data(0),
            base if base == Self::CONTROL_STEREO_BASE + 1 => self.control_stereo.get_data(1),
            Self::CONTROL_MIXING_BASE => self.control_mixing.get_data(0),
            base if base == Self::CONTROL_MIXING_BASE + 1 => self.control_mixing.get_data(1),
            Self::CONTROL_ENABLE_BASE => self.control_enable.get_data(0),
            base if base == Self::CONTROL_ENABLE_BASE + 1 => self.control_enable.get_data(1),
            Self::SOUND_BIAS_BASE => self.sound_bias.get_data(0),
            base if base == Self::SOUND_BIAS_BASE + 1 => self.sound_bias.get_data(1),
            Self::WAVE_RAM_BASE..=Self::WAVE_RAM_END => {
                self.wave_ram[(offset - Self::WAVE_RAM_BASE) as usize]
            }
            // The FIFOs are write-only.
            Self::FIFO_A_BASE..=Self::FIFO_A_END | Self::FIFO_B_BASE..=Self::FIFO_B_END => 0,
            _ => 0,
        }
    }

    pub fn write_register_byte(&mut self, value: u8, offset: u32) {
        match offset {
            Self::CHANNEL_REGISTERS_BASE..=Self::CHANNEL_REGISTERS_END => {
                let register = ((offset - Self::CHANNEL_REGISTERS_BASE) / 2) as usize;
                self.channel_registers[register] =
                    self.channel_registers[register].set_data(value, offset & 0b1);
            }
            Self::CONTROL_STEREO_BASE => {
                self.control_stereo = self.control_stereo.set_data(value, 0)
            }
            base if base == Self::CONTROL_STEREO_BASE + 1 => {
                self.control_stereo = self.control_stereo.set_data(value, 1)
            }
            Self::CONTROL_MIXING_BASE => {
                self.control_mixing = self.control_mixing.set_data(value, 0)
            }
            base if base == Self::CONTROL_MIXING_BASE + 1 => {
                self.control_mixing = self.control_mixing.set_data(value, 1);

                if self
                    .control_mixing
                    .get_bit(Self::FIFO_A_RESET_BIT_INDEX)
                {
                    self.fifo_a.clear();
                    self.control_mixing = self
                        .control_mixing
                        .set_bit(Self::FIFO_A_RESET_BIT_INDEX, false);
                }
                if self
                    .control_mixing
                    .get_bit(Self::FIFO_B_RESET_BIT_INDEX)
                {
                    self.fifo_b.clear();
                    self.control_mixing = self
                        .control_mixing
                        .set_bit(Self::FIFO_B_RESET_BIT_INDEX, false);
                }
            }
            Self::CONTROL_ENABLE_BASE => {
                // Only the master enable bit is writable; the channel status
                // bits are read-only.
                self.control_enable = self
                    .control_enable
                    .set_bit(Self::MASTER_ENABLE_BIT_INDEX, value.get_bit(7));
            }
            base if base == Self::CONTROL_ENABLE_BASE + 1 => {}
            Self::SOUND_BIAS_BASE => self.sound_bias = self.sound_bias.set_data(value, 0),
            base if base == Self::SOUND_BIAS_BASE + 1 => {
                self.sound_bias = self.sound_bias.set_data(value, 1)
            }
            Self::WAVE_RAM_BASE..=Self::WAVE_RAM_END => {
                self.wave_ram[(offset - Self::WAVE_RAM_BASE) as usize] = value
            }
            Self::FIFO_A_BASE..=Self::FIFO_A_END => self.fifo_a.push(value),
            Self::FIFO_B_BASE..=Self::FIFO_B_END => self.fifo_b.push(value),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_clock_produces_stereo_frames() {
        let mut apu = Apu::default();
        apu.write_register_byte(0x80, 0x084); // master enable

        apu.step(CYCLES_PER_SAMPLE * 4);
        let samples = apu.take_samples();
        assert_eq!(samples.len(), 8);
    }

    #[test]
    fn disabled_apu_emits_silence() {
        let mut apu = Apu::default();
        apu.step(CYCLES_PER_SAMPLE);
        assert_eq!(apu.take_samples(), vec![0, 0]);
    }

    #[test]
    fn fifo_drain_requests_dma() {
        let mut apu = Apu::default();
        apu.write_register_byte(0x80, 0x084); // master enable

        // Fill FIFO A via its MMIO port (timer 0 clocks it by default).
        for _ in 0..FIFO_CAPACITY {
            apu.write_register_byte(0x40, 0x0A0);
        }

        for _ in 0..(FIFO_CAPACITY - FIFO_REFILL_THRESHOLD - 1) {
            assert!(!apu.clock_fifo(0).fifo_a);
        }
        assert!(apu.clock_fifo(0).fifo_a);
    }

    #[test]
    fn fifo_sample_reaches_the_mix() {
        let mut apu = Apu::default();
        apu.write_register_byte(0x80, 0x084); // master enable
        apu.write_register_byte(0x04, 0x082); // FIFO A full volume
        apu.write_register_byte(0x03, 0x083); // FIFO A both sides, timer 0

        apu.write_register_byte(0x20, 0x0A0);
        apu.clock_fifo(0);

        apu.step(CYCLES_PER_SAMPLE);
        let samples = apu.take_samples();
        assert_eq!(samples, vec![0x20 << 6, 0x20 << 6]);
    }

    #[test]
    fn sound_bias_boots_to_midpoint() {
        let apu = Apu::default();
        assert_eq!(apu.read_register_byte(0x089), 0x02);
    }
}
