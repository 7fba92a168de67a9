use anyhow::{anyhow, Result};

use crate::apu::Apu;
use crate::cartridge::Cartridge;
use crate::dma::{DmaChannel, StartTiming, TransferUnit};
use crate::keypad::Keypad;
use crate::lcd::Lcd;
use crate::timer::Timer;
use crate::{BitManipulation, DataAccess};

const BIOS_SIZE: usize = 0x4000;
const BOARD_WRAM_SIZE: usize = 0x4_0000;
const CHIP_WRAM_SIZE: usize = 0x8000;

#[derive(Clone, Copy, Debug)]
pub enum Interrupt {
    VBlank,
    HBlank,
    VCount,
    Timer(usize),
    Serial,
    Dma(usize),
    Keypad,
    Gamepak,
}

impl Interrupt {
    fn bit_index(self) -> usize {
        match self {
            Interrupt::VBlank => 0,
            Interrupt::HBlank => 1,
            Interrupt::VCount => 2,
            Interrupt::Timer(index) => 3 + index,
            Interrupt::Serial => 7,
            Interrupt::Dma(index) => 8 + index,
            Interrupt::Keypad => 12,
            Interrupt::Gamepak => 13,
        }
    }
}

// The single system bus: every region's storage (or its owning component)
// plus the interrupt controller, dispatched by address range. The CPU
// borrows this mutably for the duration of each instruction.
pub struct Bus {
    bios: Box<[u8; BIOS_SIZE]>,
    bios_loaded: bool,
    board_wram: Box<[u8; BOARD_WRAM_SIZE]>,
    chip_wram: Box<[u8; CHIP_WRAM_SIZE]>,

    pub lcd: Lcd,
    pub apu: Apu,
    pub keypad: Keypad,
    pub cartridge: Cartridge,
    pub timers: [Timer; 4],
    dma_channels: [DmaChannel; 4],

    interrupt_enable: u16,
    interrupt_request: u16,
    interrupt_master_enable: u16,
    waitstate_control: u16,
    post_boot_flag: u8,
    halt_requested: bool,
}

impl Bus {
    const BIOS_BASE: u32 = 0x0000_0000;
    const BIOS_END: u32 = 0x0000_3FFF;

    const BOARD_WRAM_BASE: u32 = 0x0200_0000;
    const BOARD_WRAM_END: u32 = 0x0203_FFFF;

    const CHIP_WRAM_BASE: u32 = 0x0300_0000;
    const CHIP_WRAM_END: u32 = 0x0300_7FFF;

    const IO_BASE: u32 = 0x0400_0000;
    const IO_END: u32 = 0x0400_03FF;

    const PALETTE_RAM_BASE: u32 = 0x0500_0000;
    const PALETTE_RAM_END: u32 = 0x0500_03FF;

    const VRAM_BASE: u32 = 0x0600_0000;
    const VRAM_END: u32 = 0x0601_7FFF;
    const VRAM_MIRROR_BASE: u32 = 0x0001_0000;
    const VRAM_MIRROR_OFFSET: u32 = 0x8000;

    const OAM_BASE: u32 = 0x0700_0000;
    const OAM_END: u32 = 0x0700_03FF;

    const ROM_BASE: u32 = 0x0800_0000;
    const ROM_END: u32 = 0x09FF_FFFF;

    const SRAM_BASE: u32 = 0x0E00_0000;
    const SRAM_END: u32 = 0x0E00_FFFF;

    pub const FIFO_A_ADDRESS: u32 = 0x0400_00A0;
    pub const FIFO_B_ADDRESS: u32 = 0x0400_00A4;

    pub fn new(cartridge: Cartridge) -> Self {
        Self {
            bios: Box::new([0; BIOS_SIZE]),
            bios_loaded: false,
            board_wram: Box::new([0; BOARD_WRAM_SIZE]),
            chip_wram: Box::new([0; CHIP_WRAM_SIZE]),

            lcd: Lcd::default(),
            apu: Apu::default(),
            keypad: Keypad::default(),
            cartridge,
            timers: Default::default(),
            dma_channels: [
                DmaChannel::new(0),
                DmaChannel::new(1),
                DmaChannel::new(2),
                DmaChannel::new(3),
            ],

            interrupt_enable: 0,
            interrupt_request: 0,
            interrupt_master_enable: 0,
            waitstate_control: 0,
            post_boot_flag: 0,
            halt_requested: false,
        }
    }

    // Reinitialise everything except the loaded BIOS and the cartridge
    // (battery-backed SRAM survives a reset).
    pub fn reset(&mut self) {
        self.board_wram.fill(0);
        self.chip_wram.fill(0);
        self.lcd = Lcd::default();
        self.apu = Apu::default();
        self.keypad = Keypad::default();
        self.timers = Default::default();
        self.dma_channels = [
            DmaChannel::new(0),
            DmaChannel::new(1),
            DmaChannel::new(2),
            DmaChannel::new(3),
        ];
        self.interrupt_enable = 0;
        self.interrupt_request = 0;
        self.interrupt_master_enable = 0;
        self.waitstate_control = 0;
        self.post_boot_flag = 0;
        self.halt_requested = false;
    }

    pub fn load_bios(&mut self, data: &[u8]) -> Result<()> {
        if data.len() != BIOS_SIZE {
            return Err(anyhow!(
                "BIOS image must be exactly {} bytes, got {}",
                BIOS_SIZE,
                data.len()
            ));
        }

        self.bios.copy_from_slice(data);
        self.bios_loaded = true;
        Ok(())
    }

    pub fn bios_loaded(&self) -> bool {
        self.bios_loaded
    }

    fn vram_offset(address: u32) -> u32 {
        let offset = address - Self::VRAM_BASE;
        if offset >= Self::VRAM_MIRROR_BASE {
            offset - Self::VRAM_MIRROR_OFFSET
        } else {
            offset
        }
    }
}

// Reads and writes. Wider accesses decompose into byte accesses; misaligned
// words rotate, misaligned halfwords drop the low address bit.
impl Bus {
    pub fn read_byte(&self, address: u32) -> u8 {
        match address {
            Self::BIOS_BASE..=Self::BIOS_END => self.bios[address as usize],
            Self::BOARD_WRAM_BASE..=Self::BOARD_WRAM_END => {
                self.board_wram[(address - Self::BOARD_WRAM_BASE) as usize]
            }
            Self::CHIP_WRAM_BASE..=Self::CHIP_WRAM_END => {
                self.chip_wram[(address - Self::CHIP_WRAM_BASE) as usize]
            }
            Self::IO_BASE..=Self::IO_END => self.io_read_byte(address - Self::IO_BASE),
            Self::PALETTE_RAM_BASE..=Self::PALETTE_RAM_END => {
                self.lcd.read_palette_byte(address - Self::PALETTE_RAM_BASE)
            }
            Self::VRAM_BASE..=Self::VRAM_END => self.lcd.read_vram_byte(Self::vram_offset(address)),
            Self::OAM_BASE..=Self::OAM_END => self.lcd.read_oam_byte(address - Self::OAM_BASE),
            Self::ROM_BASE..=Self::ROM_END => {
                self.cartridge.read_rom_byte(address - Self::ROM_BASE)
            }
            Self::SRAM_BASE..=Self::SRAM_END => {
                self.cartridge.read_sram_byte(address - Self::SRAM_BASE)
            }
            _ => 0,
        }
    }

    pub fn read_halfword(&self, address: u32) -> u16 {
        let aligned = address & !0b1;
        u16::from_le_bytes([self.read_byte(aligned), self.read_byte(aligned + 1)])
    }

    pub fn read_word(&self, address: u32) -> u32 {
        let aligned = address & !0b11;
        let value = u32::from_le_bytes([
            self.read_byte(aligned),
            self.read_byte(aligned + 1),
            self.read_byte(aligned + 2),
            self.read_byte(aligned + 3),
        ]);

        value.rotate_right(8 * (address & 0b11))
    }

    pub fn write_byte(&mut self, value: u8, address: u32) {
        match address {
            // BIOS and ROM are read-only.
            Self::BIOS_BASE..=Self::BIOS_END => {
                log::debug!("0x{:02X} -> ignored BIOS write", value)
            }
            Self::BOARD_WRAM_BASE..=Self::BOARD_WRAM_END => {
                self.board_wram[(address - Self::BOARD_WRAM_BASE) as usize] = value
            }
            Self::CHIP_WRAM_BASE..=Self::CHIP_WRAM_END => {
                self.chip_wram[(address - Self::CHIP_WRAM_BASE) as usize] = value
            }
            Self::IO_BASE..=Self::IO_END => self.io_write_byte(value, address - Self::IO_BASE),
            Self::PALETTE_RAM_BASE..=Self::PALETTE_RAM_END => self
                .lcd
                .write_palette_byte(value, address - Self::PALETTE_RAM_BASE),
            Self::VRAM_BASE..=Self::VRAM_END => {
                self.lcd.write_vram_byte(value, Self::vram_offset(address))
            }
            Self::OAM_BASE..=Self::OAM_END => {
                self.lcd.write_oam_byte(value, address - Self::OAM_BASE)
            }
            Self::ROM_BASE..=Self::ROM_END => {
                log::debug!("0x{:02X} -> ignored ROM write", value)
            }
            Self::SRAM_BASE..=Self::SRAM_END => self
                .cartridge
                .write_sram_byte(value, address - Self::SRAM_BASE),
            _ => {}
        }
    }

    pub fn write_halfword(&mut self, value: u16, address: u32) {
        let aligned = address & !0b1;
        let [low, high] = value.to_le_bytes();
        self.write_byte(low, aligned);
        self.write_byte(high, aligned + 1);
    }

    pub fn write_word(&mut self, value: u32, address: u32) {
        let aligned = address & !0b11;
        for (offset, byte) in value.to_le_bytes().into_iter().enumerate() {
            self.write_byte(byte, aligned + offset as u32);
        }
    }
}

// MMIO dispatch, offsets relative to 0x0400_0000.
impl Bus {
    const DISPLAY_BASE: u32 = 0x000;
    const DISPLAY_END: u32 = 0x05F;
    const SOUND_BASE: u32 = 0x060;
    const SOUND_END: u32 = 0x0A7;
    const DMA_BASE: u32 = 0x0B0;
    const DMA_END: u32 = 0x0DF;
    const TIMER_BASE: u32 = 0x100;
    const TIMER_END: u32 = 0x10F;
    const KEY_STATUS_BASE: u32 = 0x130;
    const KEY_CONTROL_BASE: u32 = 0x132;
    const INTERRUPT_ENABLE_BASE: u32 = 0x200;
    const INTERRUPT_REQUEST_BASE: u32 = 0x202;
    const WAITSTATE_BASE: u32 = 0x204;
    const INTERRUPT_MASTER_ENABLE_BASE: u32 = 0x208;
    const POST_BOOT_FLAG_OFFSET: u32 = 0x300;
    const HALT_CONTROL_OFFSET: u32 = 0x301;

    fn io_read_byte(&self, offset: u32) -> u8 {
        match offset {
            Self::DISPLAY_BASE..=Self::DISPLAY_END => self.lcd.read_register_byte(offset),
            Self::SOUND_BASE..=Self::SOUND_END => self.apu.read_register_byte(offset),
            Self::DMA_BASE..=Self::DMA_END => {
                let channel = ((offset - Self::DMA_BASE) / 12) as usize;
                let register = (offset - Self::DMA_BASE) % 12;
                match register {
                    // Source, destination and word count are write-only.
                    10 | 11 => self.dma_channels[channel].read_control(register & 0b1),
                    _ => 0,
                }
            }
            Self::TIMER_BASE..=Self::TIMER_END => {
                let channel = ((offset - Self::TIMER_BASE) / 4) as usize;
                if offset & 0b10 == 0 {
                    self.timers[channel].read_counter(offset & 0b1)
                } else {
                    self.timers[channel].read_control(offset & 0b1)
                }
            }
            Self::KEY_STATUS_BASE => self.keypad.read_key_status(0),
            offset if offset == Self::KEY_STATUS_BASE + 1 => self.keypad.read_key_status(1),
            Self::KEY_CONTROL_BASE => self.keypad.read_interrupt_control(0),
            offset if offset == Self::KEY_CONTROL_BASE + 1 => self.keypad.read_interrupt_control(1),
            Self::INTERRUPT_ENABLE_BASE => self.interrupt_enable.get_data(0),
            offset if offset == Self::INTERRUPT_ENABLE_BASE + 1 => self.interrupt_enable.get_data(1),
            Self::INTERRUPT_REQUEST_BASE => self.interrupt_request.get_data(0),
            offset if offset == Self::INTERRUPT_REQUEST_BASE + 1 => {
                self.interrupt_request.get_data(1)
            }
            Self::WAITSTATE_BASE => self.waitstate_control.get_data(0),
            offset if offset == Self::WAITSTATE_BASE + 1 => self.waitstate_control.get_data(1),
            Self::INTERRUPT_MASTER_ENABLE_BASE => self.interrupt_master_enable.get_data(0),
            offset if offset == Self::INTERRUPT_MASTER_ENABLE_BASE + 1 => {
                self.interrupt_master_enable.get_data(1)
            }
            Self::POST_BOOT_FLAG_OFFSET => self.post_boot_flag,
            _ => {
                log::debug!("read from unimplemented I/O register 0x{:03X}", offset);
                0
            }
        }
    }

    fn io_write_byte(&mut self, value: u8, offset: u32) {
        match offset {
            Self::DISPLAY_BASE..=Self::DISPLAY_END => self.lcd.write_register_byte(value, offset),
            Self::SOUND_BASE..=Self::SOUND_END => self.apu.write_register_byte(value, offset),
            Self::DMA_BASE..=Self::DMA_END => {
                let channel = ((offset - Self::DMA_BASE) / 12) as usize;
                let register = (offset - Self::DMA_BASE) % 12;
                match register {
                    0..=3 => self.dma_channels[channel].write_source(value, register),
                    4..=7 => self.dma_channels[channel].write_dest(value, register - 4),
                    8..=9 => self.dma_channels[channel].write_word_count(value, register & 0b1),
                    10..=11 => self.dma_channels[channel].write_control(value, register & 0b1),
                    _ => unreachable!(),
                }
            }
            Self::TIMER_BASE..=Self::TIMER_END => {
                let channel = ((offset - Self::TIMER_BASE) / 4) as usize;
                if offset & 0b10 == 0 {
                    self.timers[channel].write_reload(value, offset & 0b1);
                } else {
                    self.timers[channel].write_control(value, offset & 0b1);
                }
            }
            // KEYINPUT is read-only.
            Self::KEY_STATUS_BASE => {}
            offset if offset == Self::KEY_STATUS_BASE + 1 => {}
            Self::KEY_CONTROL_BASE => self.keypad.write_interrupt_control(value, 0),
            offset if offset == Self::KEY_CONTROL_BASE + 1 => {
                self.keypad.write_interrupt_control(value, 1)
            }
            Self::INTERRUPT_ENABLE_BASE => {
                self.interrupt_enable = self.interrupt_enable.set_data(value, 0)
            }
            offset if offset == Self::INTERRUPT_ENABLE_BASE + 1 => {
                self.interrupt_enable = self.interrupt_enable.set_data(value, 1)
            }
            // IF is write-one-to-clear.
            Self::INTERRUPT_REQUEST_BASE => self.interrupt_request &= !u16::from(value),
            offset if offset == Self::INTERRUPT_REQUEST_BASE + 1 => {
                self.interrupt_request &= !(u16::from(value) << 8)
            }
            Self::WAITSTATE_BASE => {
                self.waitstate_control = self.waitstate_control.set_data(value, 0)
            }
            offset if offset == Self::WAITSTATE_BASE + 1 => {
                self.waitstate_control = self.waitstate_control.set_data(value, 1)
            }
            Self::INTERRUPT_MASTER_ENABLE_BASE => {
                self.interrupt_master_enable = u16::from(value) & 0b1
            }
            offset if offset == Self::INTERRUPT_MASTER_ENABLE_BASE + 1 => {}
            Self::POST_BOOT_FLAG_OFFSET => self.post_boot_flag = value,
            Self::HALT_CONTROL_OFFSET => self.halt_requested = true,
            _ => log::debug!(
                "0x{:02X} -> write to unimplemented I/O register 0x{:03X}",
                value,
                offset
            ),
        }
    }
}

// Interrupt controller.
impl Bus {
    pub fn request_interrupt(&mut self, interrupt: Interrupt) {
        self.interrupt_request = self.interrupt_request.set_bit(interrupt.bit_index(), true);
    }

    // The IRQ line into the CPU: master enable plus any enabled pending
    // source.
    pub fn irq_pending(&self) -> bool {
        self.interrupt_master_enable.get_bit(0)
            && (self.interrupt_enable & self.interrupt_request) != 0
    }

    // Halt wakes on any enabled pending source, ignoring IME and CPSR.I.
    pub fn halt_wake_pending(&self) -> bool {
        (self.interrupt_enable & self.interrupt_request) != 0
    }

    pub fn take_halt_request(&mut self) -> bool {
        std::mem::take(&mut self.halt_requested)
    }
}

// The per-step fan-out: the cycle count the CPU just consumed is delivered
// to every subsystem in a fixed, observable order: timers, APU, DMA, PPU.
// Returns true when the PPU finished a frame.
impl Bus {
    pub fn step(&mut self, cycles: u32) -> bool {
        if self.keypad.poll_interrupt() {
            self.request_interrupt(Interrupt::Keypad);
        }

        let mut cascade_ticks = 0;
        for index in 0..4 {
            let overflows = self.timers[index].step(cycles, cascade_ticks);

            if overflows > 0 {
                if self.timers[index].irq_enabled() {
                    self.request_interrupt(Interrupt::Timer(index));
                }

                // Timers 0 and 1 clock the direct-sound FIFOs.
                if index < 2 {
                    for _ in 0..overflows {
                        let request = self.apu.clock_fifo(index);
                        if request.fifo_a {
                            self.run_fifo_dma(Self::FIFO_A_ADDRESS);
                        }
                        if request.fifo_b {
                            self.run_fifo_dma(Self::FIFO_B_ADDRESS);
                        }
                    }
                }
            }

            cascade_ticks = overflows;
        }

        self.apu.step(cycles);
        self.step_dma();

        let events = self.lcd.step(cycles);

        if events.vblank_entered {
            if self.lcd.vblank_irq_enabled() {
                self.request_interrupt(Interrupt::VBlank);
            }
            for channel in self.dma_channels.iter_mut() {
                channel.trigger(StartTiming::VBlank);
            }
        }

        if events.hblank_entered && self.lcd.hblank_irq_enabled() {
            self.request_interrupt(Interrupt::HBlank);
        }

        if events.hblank_dma {
            for channel in self.dma_channels.iter_mut() {
                channel.trigger(StartTiming::HBlank);
            }
        }

        if events.vcount_matched && self.lcd.vcount_irq_enabled() {
            self.request_interrupt(Interrupt::VCount);
        }

        events.frame_completed
    }

    // Only one channel transfers at a time; the lowest active index wins and
    // moves up to 16 units per step.
    fn step_dma(&mut self) {
        const UNITS_PER_STEP: u32 = 16;

        let Some(index) = (0..4).find(|index| self.dma_channels[*index].is_active()) else {
            return;
        };

        let unit = self.dma_channels[index].transfer_unit();
        let units = self.dma_channels[index].internal_count().min(UNITS_PER_STEP);

        for _ in 0..units {
            let source = self.dma_channels[index].internal_source();
            let dest = self.dma_channels[index].internal_dest();

            match unit {
                TransferUnit::Halfword => {
                    let value = self.read_halfword(source & !0b1);
                    self.write_halfword(value, dest & !0b1);
                }
                TransferUnit::Word => {
                    let value = self.read_word(source & !0b11);
                    self.write_word(value, dest & !0b11);
                }
            }

            self.dma_channels[index].advance(1);
        }

        if self.dma_channels[index].internal_count() == 0 {
            self.dma_channels[index].finish_transfer();

            if self.dma_channels[index].irq_at_end() {
                self.request_interrupt(Interrupt::Dma(index));
            }
        }
    }

    // A FIFO has drained low: channels 1 and 2 in special timing feed the
    // sound FIFOs with four words, destination fixed, count untouched.
    fn run_fifo_dma(&mut self, fifo_address: u32) {
        for index in [1, 2] {
            let channel = &self.dma_channels[index];
            if !channel.enabled()
                || channel.start_timing() != StartTiming::Special
                || channel.dest() != fifo_address
            {
                continue;
            }

            for _ in 0..4 {
                let source = self.dma_channels[index].internal_source();
                let value = self.read_word(source & !0b11);
                self.write_word(value, fifo_address);
                self.dma_channels[index].advance_fifo_word();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_bus() -> Bus {
        let mut rom = vec![0u8; 0x200];
        rom[0xB2] = 0x96;
        Bus::new(Cartridge::new(&rom).unwrap())
    }

    #[test]
    fn wram_round_trips_all_widths() {
        let mut bus = test_bus();

        bus.write_byte(0xAB, 0x0200_0000);
        assert_eq!(bus.read_byte(0x0200_0000), 0xAB);

        bus.write_halfword(0x1234, 0x0300_0010);
        assert_eq!(bus.read_halfword(0x0300_0010), 0x1234);

        bus.write_word(0xDEAD_BEEF, 0x0200_1000);
        assert_eq!(bus.read_word(0x0200_1000), 0xDEAD_BEEF);
    }

    #[test]
    fn unmapped_reads_are_zero_and_writes_dropped() {
        let mut bus = test_bus();
        bus.write_word(0x1234_5678, 0x0100_0000);
        assert_eq!(bus.read_word(0x0100_0000), 0);
        assert_eq!(bus.read_word(0x0204_0000), 0);
    }

    #[test]
    fn rom_and_bios_writes_are_dropped() {
        let mut bus = test_bus();
        bus.write_byte(0xFF, 0x0800_00B2);
        assert_eq!(bus.read_byte(0x0800_00B2), 0x96);

        bus.write_byte(0xFF, 0x0000_0000);
        assert_eq!(bus.read_byte(0x0000_0000), 0);
    }

    #[test]
    fn vram_upper_window_mirrors_down() {
        let mut bus = test_bus();
        bus.write_halfword(0xCAFE, 0x0601_0000);
        assert_eq!(bus.read_halfword(0x0600_8000), 0xCAFE);

        bus.write_halfword(0xBEEF, 0x0601_7FFE);
        assert_eq!(bus.read_halfword(0x0600_FFFE), 0xBEEF);
    }

    #[test]
    fn misaligned_word_reads_rotate() {
        let mut bus = test_bus();
        bus.write_word(0x1122_3344, 0x0200_0000);
        assert_eq!(bus.read_word(0x0200_0001), 0x4411_2233);
    }

    #[test]
    fn interrupt_flags_are_write_one_to_clear() {
        let mut bus = test_bus();
        bus.request_interrupt(Interrupt::VBlank);
        bus.request_interrupt(Interrupt::Timer(0));
        assert_eq!(bus.read_halfword(0x0400_0202), 0b1001);

        bus.write_halfword(0b0001, 0x0400_0202);
        assert_eq!(bus.read_halfword(0x0400_0202), 0b1000);
    }

    #[test]
    fn irq_line_requires_master_enable() {
        let mut bus = test_bus();
        bus.write_halfword(0x0001, 0x0400_0200); // IE: VBlank
        bus.request_interrupt(Interrupt::VBlank);
        assert!(!bus.irq_pending());

        bus.write_halfword(0x0001, 0x0400_0208); // IME
        assert!(bus.irq_pending());
    }

    #[test]
    fn keyinput_writes_are_dropped() {
        let mut bus = test_bus();
        bus.write_halfword(0x0000, 0x0400_0130);
        assert_eq!(bus.read_halfword(0x0400_0130), 0x03FF);
    }

    #[test]
    fn haltcnt_write_requests_halt() {
        let mut bus = test_bus();
        bus.write_byte(0x00, 0x0400_0301);
        assert!(bus.take_halt_request());
        assert!(!bus.take_halt_request());
    }

    #[test]
    fn immediate_dma_copies_memory() {
        let mut bus = test_bus();

        for offset in 0..32u32 {
            bus.write_byte(offset as u8, 0x0200_0000 + offset);
        }

        bus.write_word(0x0200_0000, 0x0400_00B0); // DMA0SAD
        bus.write_word(0x0200_1000, 0x0400_00B4); // DMA0DAD
        bus.write_halfword(16, 0x0400_00B8); // 16 halfwords
        bus.write_halfword(0x8000, 0x0400_00BA); // enable, immediate

        bus.step(1);

        for offset in 0..32u32 {
            assert_eq!(bus.read_byte(0x0200_1000 + offset), offset as u8);
        }
    }

    #[test]
    fn dma_completion_raises_irq_when_enabled() {
        let mut bus = test_bus();
        bus.write_word(0x0200_0000, 0x0400_00B0);
        bus.write_word(0x0200_1000, 0x0400_00B4);
        bus.write_halfword(4, 0x0400_00B8);
        bus.write_halfword(0xC000, 0x0400_00BA); // enable, IRQ at end

        bus.step(1);
        assert_eq!(bus.read_halfword(0x0400_0202) & (1 << 8), 1 << 8);
    }

    #[test]
    fn lower_dma_channel_wins() {
        let mut bus = test_bus();

        bus.write_byte(0x11, 0x0200_0000);
        bus.write_byte(0x22, 0x0200_0100);

        // Channel 1 and channel 3 both become active; channel 1 must finish
        // first.
        bus.write_word(0x0200_0100, 0x0400_00BC); // DMA1SAD
        bus.write_word(0x0200_1100, 0x0400_00C0); // DMA1DAD
        bus.write_halfword(1, 0x0400_00C4);
        bus.write_halfword(0x8000, 0x0400_00C6);

        bus.write_word(0x0200_0000, 0x0400_00D4); // DMA3SAD
        bus.write_word(0x0200_1000, 0x0400_00D8); // DMA3DAD
        bus.write_halfword(1, 0x0400_00DC);
        bus.write_halfword(0x8000, 0x0400_00DE);

        bus.step(1);
        assert_eq!(bus.read_byte(0x0200_1100), 0x22);
        assert_eq!(bus.read_byte(0x0200_1000), 0x00);

        bus.step(1);
        assert_eq!(bus.read_byte(0x0200_1000), 0x11);
    }

    #[test]
    fn timer_overflow_requests_interrupt() {
        let mut bus = test_bus();
        bus.write_halfword(0xFFFF, 0x0400_0100); // TM0 reload
        bus.write_halfword(0x00C0, 0x0400_0102); // enable + IRQ

        bus.step(1);
        assert_eq!(bus.read_halfword(0x0400_0202) & (1 << 3), 1 << 3);
    }

    #[test]
    fn timer_cascade_increments_on_overflow() {
        let mut bus = test_bus();
        bus.write_halfword(0xFFFF, 0x0400_0100); // TM0 reloads straight to overflow
        bus.write_halfword(0x0080, 0x0400_0102); // TM0 enable
        bus.write_halfword(0x0084, 0x0400_0106); // TM1 enable, count-up

        bus.step(3);
        assert_eq!(bus.read_halfword(0x0400_0104), 3);
    }

    #[test]
    fn bios_must_be_exactly_16k() {
        let mut bus = test_bus();
        assert!(bus.load_bios(&[0u8; 0x100]).is_err());
        assert!(bus.load_bios(&vec![0u8; 0x4000]).is_ok());
    }
}
