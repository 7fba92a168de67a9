mod apu;
mod bit_manipulation;
mod bus;
mod cartridge;
mod cpu;
mod data_access;
mod dma;
mod keypad;
mod lcd;
mod timer;

use bit_manipulation::BitManipulation;
use data_access::DataAccess;

pub use apu::SAMPLE_RATE;
pub use bus::Bus;
pub use cartridge::{Backup, BackupHint, Cartridge, CartridgeHeader};
pub use cpu::{Cpu, CpuMode, Register};
pub use keypad::Key;
pub use lcd::{SCREEN_HEIGHT, SCREEN_WIDTH};

pub const CYCLES_PER_SECOND: u64 = 16_777_216;
pub const CYCLES_PER_FRAME: u64 = 280_896;

// The whole console: the CPU, the bus with every subsystem behind it, and
// the per-step scheduling between them.
pub struct Gba {
    cpu: Cpu,
    bus: Bus,
    frame_count: u64,
    total_cycles: u64,
}

impl Gba {
    pub fn new(cartridge: Cartridge) -> Self {
        let mut gba = Self {
            cpu: Cpu::new(),
            bus: Bus::new(cartridge),
            frame_count: 0,
            total_cycles: 0,
        };
        gba.reset();
        gba
    }

    pub fn load_bios(&mut self, data: &[u8]) -> anyhow::Result<()> {
        self.bus.load_bios(data)?;
        self.reset();
        Ok(())
    }

    // Valid between steps only. Without a BIOS image the CPU boots straight
    // to the cartridge with the register state the BIOS would have left.
    pub fn reset(&mut self) {
        self.bus.reset();
        self.cpu.reset(!self.bus.bios_loaded());
        self.frame_count = 0;
        self.total_cycles = 0;
    }

    // One instruction, then the fixed fan-out: CPU -> timers -> APU -> DMA
    // -> PPU -> interrupt check. Returns the cycles consumed, which is also
    // exactly what every subsystem received.
    pub fn step(&mut self) -> u32 {
        if self.bus.take_halt_request() {
            self.cpu.set_halted(true);
        }
        if self.cpu.halted() && self.bus.halt_wake_pending() {
            self.cpu.set_halted(false);
        }

        let cycles = self.cpu.step(&mut self.bus);
        self.total_cycles += u64::from(cycles);

        if self.bus.step(cycles) {
            self.frame_count += 1;
        }

        // IRQs requested during this step become visible at the boundary
        // before the next instruction.
        if self.bus.irq_pending() {
            self.cpu.raise_irq();
        }

        cycles
    }

    pub fn run_frame(&mut self) {
        let mut cycles = 0u64;
        while cycles < CYCLES_PER_FRAME {
            cycles += u64::from(self.step());
        }
    }

    pub fn frame_buffer(&self) -> &[u16; SCREEN_WIDTH * SCREEN_HEIGHT] {
        self.bus.lcd.frame_buffer()
    }

    pub fn set_key(&mut self, key: Key, pressed: bool) {
        self.bus.keypad.set_pressed(key, pressed);
    }

    pub fn take_audio_samples(&mut self) -> Vec<i16> {
        self.bus.apu.take_samples()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }
}

pub fn calculate_frame_checksum(gba: &Gba) -> u64 {
    use std::hash::Hasher;
    use xxhash_rust::xxh3::Xxh3;

    let mut hasher = Xxh3::default();
    for pixel in gba.frame_buffer().iter() {
        hasher.write_u16(*pixel);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gba_with_program(words: &[u32]) -> Gba {
        let mut rom = Vec::new();
        for word in words {
            rom.extend_from_slice(&word.to_le_bytes());
        }
        rom.resize(rom.len().max(0xC0), 0);

        Gba::new(Cartridge::new(&rom).unwrap())
    }

    const ARM_LOOP: u32 = 0xEAFF_FFFE; // b .

    #[test]
    fn forced_blank_renders_a_white_frame() {
        let mut gba = gba_with_program(&[ARM_LOOP]);
        gba.bus_mut().write_halfword(0x0080, 0x0400_0000);

        gba.run_frame();

        assert!(gba.frame_buffer().iter().all(|pixel| *pixel == 0x7FFF));
        assert_eq!(gba.frame_count(), 1);
    }

    #[test]
    fn mode_3_draws_a_red_pixel() {
        let mut gba = gba_with_program(&[ARM_LOOP]);
        gba.bus_mut().write_halfword(0x0403, 0x0400_0000); // mode 3, BG2
        gba.bus_mut().write_halfword(0x001F, 0x0600_0000); // pure red

        gba.run_frame();

        assert_eq!(gba.frame_buffer()[0], 0x001F);
    }

    #[test]
    fn branch_and_link_records_the_return_address() {
        let mut gba = gba_with_program(&[
            0xEB00_0000, // bl +8
            0x0000_0000,
            0xE3A0_002A, // mov r0, #42
            ARM_LOOP,
        ]);

        gba.step();
        assert_eq!(gba.cpu().read_register(Register::R14), 0x0800_0004);
        assert_eq!(gba.cpu().pc(), 0x0800_0008);

        gba.step();
        assert_eq!(gba.cpu().read_register(Register::R0), 42);
    }

    #[test]
    fn vblank_interrupt_enters_the_irq_vector() {
        let mut gba = gba_with_program(&[ARM_LOOP]);
        gba.bus_mut().write_halfword(0x0001, 0x0400_0208); // IME
        gba.bus_mut().write_halfword(0x0001, 0x0400_0200); // IE: VBlank
        gba.bus_mut().write_halfword(0x0008, 0x0400_0004); // DISPSTAT VBlank IRQ

        let cpsr_before = gba.cpu().cpsr();

        for _ in 0..250_000 {
            gba.step();
            if gba.cpu().mode() == CpuMode::Irq {
                break;
            }
        }

        assert_eq!(gba.cpu().mode(), CpuMode::Irq);
        assert_eq!(gba.cpu().pc(), 0x18);
        assert_eq!(gba.cpu().spsr(), cpsr_before);
        // Return PC is the looping branch; LR is return + 4.
        assert_eq!(gba.cpu().read_register(Register::R14), 0x0800_0004);
        assert!(gba.cpu().irq_disabled());
    }

    #[test]
    fn immediate_dma_copies_halfwords() {
        let mut gba = gba_with_program(&[ARM_LOOP]);

        for offset in 0..32u32 {
            gba.bus_mut().write_byte(offset as u8, 0x0200_0000 + offset);
        }

        gba.bus_mut().write_word(0x0200_0000, 0x0400_00B0);
        gba.bus_mut().write_word(0x0200_1000, 0x0400_00B4);
        gba.bus_mut().write_halfword(16, 0x0400_00B8);
        gba.bus_mut().write_halfword(0x8000, 0x0400_00BA);

        gba.step();

        for offset in 0..32u32 {
            assert_eq!(gba.bus().read_byte(0x0200_1000 + offset), offset as u8);
        }
    }

    #[test]
    fn key_latch_is_active_low() {
        let mut gba = gba_with_program(&[ARM_LOOP]);
        assert_eq!(gba.bus().read_halfword(0x0400_0130), 0x03FF);

        gba.set_key(Key::A, true);
        assert_eq!(gba.bus().read_halfword(0x0400_0130), 0x03FE);

        gba.set_key(Key::A, false);
        assert_eq!(gba.bus().read_halfword(0x0400_0130), 0x03FF);
    }

    #[test]
    fn keypad_interrupt_fires_on_match() {
        let mut gba = gba_with_program(&[ARM_LOOP]);
        gba.bus_mut().write_halfword(0x4001, 0x0400_0132); // IRQ on key A

        gba.set_key(Key::A, true);
        gba.step();

        assert_eq!(gba.bus().read_halfword(0x0400_0202) & (1 << 12), 1 << 12);
    }

    #[test]
    fn software_interrupt_switches_to_supervisor() {
        let mut gba = gba_with_program(&[0xEF00_0000, ARM_LOOP]); // swi 0

        let cpsr_before = gba.cpu().cpsr();
        gba.step();

        assert_eq!(gba.cpu().mode(), CpuMode::Supervisor);
        assert_eq!(gba.cpu().pc(), 0x08);
        assert_eq!(gba.cpu().read_register(Register::R14), 0x0800_0004);
        assert_eq!(gba.cpu().spsr(), cpsr_before);
        assert!(gba.cpu().irq_disabled());
    }

    #[test]
    fn swi_round_trips_through_a_loaded_bios() {
        // A minimal BIOS: reset vector jumps to the cartridge, the SWI
        // vector returns immediately with `movs pc, lr`.
        let mut bios = vec![0u8; 0x4000];
        bios[0x00..0x04].copy_from_slice(&0xE51F_F004u32.to_le_bytes()); // ldr pc, [pc, #-4]
        bios[0x04..0x08].copy_from_slice(&0x0800_0000u32.to_le_bytes());
        bios[0x08..0x0C].copy_from_slice(&0xE1B0_F00Eu32.to_le_bytes()); // movs pc, lr

        let mut gba = gba_with_program(&[
            0xE3A0_1007, // mov r1, #7
            0xEF00_0000, // swi 0
            0xE3A0_2009, // mov r2, #9
            ARM_LOOP,
        ]);
        gba.load_bios(&bios).unwrap();

        assert_eq!(gba.cpu().pc(), 0);

        for _ in 0..5 {
            gba.step();
        }

        assert_eq!(gba.cpu().read_register(Register::R1), 7);
        assert_eq!(gba.cpu().read_register(Register::R2), 9);
        assert_eq!(gba.cpu().pc(), 0x0800_000C);
    }

    #[test]
    fn bx_switches_into_thumb_state() {
        let mut gba = gba_with_program(&[
            0xE28F_0001, // add r0, pc, #1
            0xE12F_FF10, // bx r0
            0xE7FE_202A, // thumb: mov r0, #42; b .
        ]);

        gba.step();
        gba.step();
        assert_eq!(gba.cpu().pc(), 0x0800_0008);

        gba.step();
        assert_eq!(gba.cpu().read_register(Register::R0), 42);
        assert!(gba.cpu().cpsr().get_bit(5));
    }

    #[test]
    fn store_multiple_then_load_multiple_round_trips() {
        let mut gba = gba_with_program(&[
            0xE3A0_0402, // mov r0, #0x02000000
            0xE3A0_1001, // mov r1, #1
            0xE3A0_2002, // mov r2, #2
            0xE8A0_0006, // stmia r0!, {r1, r2}
            0xE3A0_1000, // mov r1, #0
            0xE3A0_2000, // mov r2, #0
            0xE240_0008, // sub r0, r0, #8
            0xE8B0_0006, // ldmia r0!, {r1, r2}
            ARM_LOOP,
        ]);

        for _ in 0..8 {
            gba.step();
        }

        assert_eq!(gba.cpu().read_register(Register::R1), 1);
        assert_eq!(gba.cpu().read_register(Register::R2), 2);
        assert_eq!(gba.cpu().read_register(Register::R0), 0x0200_0008);
        assert_eq!(gba.bus().read_word(0x0200_0000), 1);
        assert_eq!(gba.bus().read_word(0x0200_0004), 2);
    }

    #[test]
    fn halt_idles_until_an_enabled_interrupt_pends() {
        let mut gba = gba_with_program(&[
            0xE3A0_002A, // mov r0, #42
            ARM_LOOP,
        ]);
        gba.bus_mut().write_halfword(0x0001, 0x0400_0200); // IE: VBlank, IME off
        gba.bus_mut().write_byte(0x00, 0x0400_0301); // HALTCNT

        gba.step();
        assert_eq!(gba.cpu().pc(), 0x0800_0000);
        assert_eq!(gba.cpu().read_register(Register::R0), 0);

        // The CPU sleeps until VBlank raises an enabled request, IME or not.
        for _ in 0..250_000 {
            gba.step();
            if gba.cpu().read_register(Register::R0) == 42 {
                break;
            }
        }

        assert_eq!(gba.cpu().read_register(Register::R0), 42);
        // With IME clear the interrupt is never taken.
        assert_ne!(gba.cpu().mode(), CpuMode::Irq);
    }

    #[test]
    fn failed_conditions_skip_at_unit_cost() {
        let mut gba = gba_with_program(&[
            0xE3B0_0000, // movs r0, #0
            0x13A0_1001, // movne r1, #1
            0x03A0_2002, // moveq r2, #2
            ARM_LOOP,
        ]);

        gba.step();
        let skipped_cycles = gba.step();
        gba.step();

        assert_eq!(skipped_cycles, 1);
        assert_eq!(gba.cpu().read_register(Register::R1), 0);
        assert_eq!(gba.cpu().read_register(Register::R2), 2);
    }

    #[test]
    fn step_cycles_match_the_subsystem_clock() {
        let mut gba = gba_with_program(&[ARM_LOOP]);

        let mut delivered = 0u64;
        for _ in 0..1000 {
            delivered += u64::from(gba.step());
        }

        assert_eq!(delivered, gba.total_cycles());
    }

    #[test]
    fn frames_are_deterministic() {
        let build = || {
            let mut gba = gba_with_program(&[ARM_LOOP]);
            gba.bus_mut().write_halfword(0x0403, 0x0400_0000);
            gba.bus_mut().write_halfword(0x7C00, 0x0600_0140);
            gba.run_frame();
            calculate_frame_checksum(&gba)
        };

        assert_eq!(build(), build());
    }

    #[test]
    fn audio_samples_accumulate_at_the_sample_rate() {
        let mut gba = gba_with_program(&[ARM_LOOP]);
        gba.bus_mut().write_byte(0x80, 0x0400_0084); // master enable

        gba.run_frame();

        let samples = gba.take_audio_samples();
        // ~548 stereo frames per video frame at 32768 Hz.
        assert!(samples.len() >= 1000 && samples.len() <= 1200);
        assert_eq!(samples.len() % 2, 0);
    }

    #[test]
    fn reset_restores_the_boot_state() {
        let mut gba = gba_with_program(&[0xE3A0_002A, ARM_LOOP]);
        gba.step();
        assert_eq!(gba.cpu().read_register(Register::R0), 42);

        gba.reset();
        assert_eq!(gba.cpu().pc(), 0x0800_0000);
        assert_eq!(gba.cpu().read_register(Register::R0), 0);
        assert_eq!(gba.frame_count(), 0);
    }
}
