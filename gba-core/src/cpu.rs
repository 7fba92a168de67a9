mod arm;
mod thumb;

use std::fmt::{self, Display};
use std::ops::RangeInclusive;

use crate::bus::Bus;
use crate::BitManipulation;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuMode {
    User,
    Fiq,
    Irq,
    Supervisor,
    Abort,
    Undefined,
    System,
}

impl CpuMode {
    const USER_BITS: u32 = 0b10000;
    const FIQ_BITS: u32 = 0b10001;
    const IRQ_BITS: u32 = 0b10010;
    const SUPERVISOR_BITS: u32 = 0b10011;
    const ABORT_BITS: u32 = 0b10111;
    const UNDEFINED_BITS: u32 = 0b11011;
    const SYSTEM_BITS: u32 = 0b11111;

    fn from_bits(bits: u32) -> Self {
        match bits & 0x1F {
            Self::USER_BITS => CpuMode::User,
            Self::FIQ_BITS => CpuMode::Fiq,
            Self::IRQ_BITS => CpuMode::Irq,
            Self::SUPERVISOR_BITS => CpuMode::Supervisor,
            Self::ABORT_BITS => CpuMode::Abort,
            Self::UNDEFINED_BITS => CpuMode::Undefined,
            Self::SYSTEM_BITS => CpuMode::System,
            other => {
                log::warn!("illegal CPSR mode bits 0b{:05b}, treating as System", other);
                CpuMode::System
            }
        }
    }

    fn bits(self) -> u32 {
        match self {
            CpuMode::User => Self::USER_BITS,
            CpuMode::Fiq => Self::FIQ_BITS,
            CpuMode::Irq => Self::IRQ_BITS,
            CpuMode::Supervisor => Self::SUPERVISOR_BITS,
            CpuMode::Abort => Self::ABORT_BITS,
            CpuMode::Undefined => Self::UNDEFINED_BITS,
            CpuMode::System => Self::SYSTEM_BITS,
        }
    }

    // Index into the banked R13/R14/SPSR arrays. User and System share the
    // unbanked slot.
    fn bank_index(self) -> usize {
        match self {
            CpuMode::Fiq => 0,
            CpuMode::Irq => 1,
            CpuMode::Supervisor => 2,
            CpuMode::Abort => 3,
            CpuMode::Undefined => 4,
            CpuMode::User | CpuMode::System => 5,
        }
    }

    fn has_spsr(self) -> bool {
        !matches!(self, CpuMode::User | CpuMode::System)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Register {
    R0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
}

impl Register {
    pub fn from_index(index: u32) -> Self {
        match index & 0xF {
            0 => Register::R0,
            1 => Register::R1,
            2 => Register::R2,
            3 => Register::R3,
            4 => Register::R4,
            5 => Register::R5,
            6 => Register::R6,
            7 => Register::R7,
            8 => Register::R8,
            9 => Register::R9,
            10 => Register::R10,
            11 => Register::R11,
            12 => Register::R12,
            13 => Register::R13,
            14 => Register::R14,
            15 => Register::R15,
            _ => unreachable!(),
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::R13 => f.write_str("sp"),
            Register::R14 => f.write_str("lr"),
            Register::R15 => f.write_str("pc"),
            other => write!(f, "r{}", other.index()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Condition {
    Equal,
    NotEqual,
    UnsignedHigherOrSame,
    UnsignedLower,
    SignedNegative,
    SignedPositiveOrZero,
    SignedOverflow,
    SignedNoOverflow,
    UnsignedHigher,
    UnsignedLowerOrSame,
    SignedGreaterOrEqual,
    SignedLessThan,
    SignedGreaterThan,
    SignedLessOrEqual,
    Always,
    Never,
}

impl Condition {
    pub fn from_bits(bits: u32) -> Self {
        match bits & 0xF {
            0 => Condition::Equal,
            1 => Condition::NotEqual,
            2 => Condition::UnsignedHigherOrSame,
            3 => Condition::UnsignedLower,
            4 => Condition::SignedNegative,
            5 => Condition::SignedPositiveOrZero,
            6 => Condition::SignedOverflow,
            7 => Condition::SignedNoOverflow,
            8 => Condition::UnsignedHigher,
            9 => Condition::UnsignedLowerOrSame,
            10 => Condition::SignedGreaterOrEqual,
            11 => Condition::SignedLessThan,
            12 => Condition::SignedGreaterThan,
            13 => Condition::SignedLessOrEqual,
            14 => Condition::Always,
            15 => Condition::Never,
            _ => unreachable!(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum ShiftType {
    Lsl,
    Lsr,
    Asr,
    Ror,
}

impl Display for ShiftType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShiftType::Lsl => f.write_str("lsl"),
            ShiftType::Lsr => f.write_str("lsr"),
            ShiftType::Asr => f.write_str("asr"),
            ShiftType::Ror => f.write_str("ror"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AluOperation {
    And,
    Eor,
    Sub,
    Rsb,
    Add,
    Adc,
    Sbc,
    Rsc,
    Tst,
    Teq,
    Cmp,
    Cmn,
    Orr,
    Mov,
    Bic,
    Mvn,
}

impl Display for AluOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mnemonic = match self {
            AluOperation::And => "and",
            AluOperation::Eor => "eor",
            AluOperation::Sub => "sub",
            AluOperation::Rsb => "rsb",
            AluOperation::Add => "add",
            AluOperation::Adc => "adc",
            AluOperation::Sbc => "sbc",
            AluOperation::Rsc => "rsc",
            AluOperation::Tst => "tst",
            AluOperation::Teq => "teq",
            AluOperation::Cmp => "cmp",
            AluOperation::Cmn => "cmn",
            AluOperation::Orr => "orr",
            AluOperation::Mov => "mov",
            AluOperation::Bic => "bic",
            AluOperation::Mvn => "mvn",
        };
        f.write_str(mnemonic)
    }
}

impl AluOperation {
    fn writes_result(self) -> bool {
        !matches!(
            self,
            AluOperation::Tst | AluOperation::Teq | AluOperation::Cmp | AluOperation::Cmn
        )
    }

    fn is_arithmetic(self) -> bool {
        matches!(
            self,
            AluOperation::Sub
                | AluOperation::Rsb
                | AluOperation::Add
                | AluOperation::Adc
                | AluOperation::Sbc
                | AluOperation::Rsc
                | AluOperation::Cmp
                | AluOperation::Cmn
        )
    }
}

#[derive(Clone, Copy, Debug)]
enum ExceptionType {
    Reset,
    Undefined,
    SoftwareInterrupt,
    PrefetchAbort,
    DataAbort,
    InterruptRequest,
    FastInterrupt,
}

impl ExceptionType {
    fn vector(self) -> u32 {
        match self {
            ExceptionType::Reset => 0x00,
            ExceptionType::Undefined => 0x04,
            ExceptionType::SoftwareInterrupt => 0x08,
            ExceptionType::PrefetchAbort => 0x0C,
            ExceptionType::DataAbort => 0x10,
            ExceptionType::InterruptRequest => 0x18,
            ExceptionType::FastInterrupt => 0x1C,
        }
    }

    fn target_mode(self) -> CpuMode {
        match self {
            ExceptionType::Reset => CpuMode::Supervisor,
            ExceptionType::Undefined => CpuMode::Undefined,
            ExceptionType::SoftwareInterrupt => CpuMode::Supervisor,
            ExceptionType::PrefetchAbort => CpuMode::Abort,
            ExceptionType::DataAbort => CpuMode::Abort,
            ExceptionType::InterruptRequest => CpuMode::Irq,
            ExceptionType::FastInterrupt => CpuMode::Fiq,
        }
    }
}

// ARM7TDMI state. The live window `r` always holds the bank selected by
// CPSR.mode; shadow arrays hold everything banked out. The pipeline is not
// emulated: `r[15]` is the address of the instruction being executed, and
// reads of R15 apply the architectural +8 (ARM) or +4 (Thumb).
pub struct Cpu {
    r: [u32; 16],
    banked_r13: [u32; 6],
    banked_r14: [u32; 6],
    banked_spsr: [u32; 5],
    fiq_r8_r12: [u32; 5],
    cpsr: u32,
    halted: bool,
    pc_written: bool,
}

impl Cpu {
    const SIGN_FLAG_BIT_INDEX: usize = 31;
    const ZERO_FLAG_BIT_INDEX: usize = 30;
    const CARRY_FLAG_BIT_INDEX: usize = 29;
    const OVERFLOW_FLAG_BIT_INDEX: usize = 28;
    const IRQ_DISABLE_BIT_INDEX: usize = 7;
    const FIQ_DISABLE_BIT_INDEX: usize = 6;
    const STATE_BIT_INDEX: usize = 5;
    const MODE_BITS_RANGE: RangeInclusive<usize> = 0..=4;

    pub fn new() -> Self {
        Self {
            r: [0; 16],
            banked_r13: [0; 6],
            banked_r14: [0; 6],
            banked_spsr: [0; 5],
            fiq_r8_r12: [0; 5],
            cpsr: CpuMode::Supervisor.bits()
                | (1 << Self::IRQ_DISABLE_BIT_INDEX)
                | (1 << Self::FIQ_DISABLE_BIT_INDEX),
            halted: false,
            pc_written: false,
        }
    }

    // Boot state when no BIOS image is present: the registers the BIOS would
    // have set up before jumping to the cartridge.
    pub fn reset(&mut self, skip_bios: bool) {
        *self = Self::new();

        if skip_bios {
            self.set_cpsr(CpuMode::System.bits());
            self.banked_r13[CpuMode::Supervisor.bank_index()] = 0x0300_7FE0;
            self.banked_r13[CpuMode::Irq.bank_index()] = 0x0300_7FA0;
            self.r[13] = 0x0300_7F00;
            self.r[15] = 0x0800_0000;
        }
    }

    pub fn step(&mut self, bus: &mut Bus) -> u32 {
        if self.halted {
            return 1;
        }

        if self.thumb_state() {
            self.step_thumb(bus)
        } else {
            self.step_arm(bus)
        }
    }

    fn step_arm(&mut self, bus: &mut Bus) -> u32 {
        let pc = self.r[15] & !0b11;
        let opcode = bus.read_word(pc);

        // The condition field gates everything else; a failed condition
        // costs one cycle.
        let condition = Condition::from_bits(opcode >> 28);
        if !self.condition_passed(condition) {
            self.r[15] = pc.wrapping_add(4);
            return 1;
        }

        let instruction = arm::decode_arm(opcode);
        log::trace!("{:08X}: {}", pc, instruction);

        self.pc_written = false;
        let cycles = self.execute_arm(bus, instruction);

        if !self.pc_written {
            self.r[15] = pc.wrapping_add(4);
        }

        cycles.max(1)
    }

    fn step_thumb(&mut self, bus: &mut Bus) -> u32 {
        let pc = self.r[15] & !0b1;
        let opcode = bus.read_halfword(pc);

        let instruction = thumb::decode_thumb(opcode);
        log::trace!("{:08X}: {}", pc, instruction);

        self.pc_written = false;
        let cycles = self.execute_thumb(bus, instruction);

        if !self.pc_written {
            self.r[15] = pc.wrapping_add(2);
        }

        cycles.max(1)
    }

    // Taken at instruction boundaries only; the scheduler checks the IRQ
    // line after every step.
    pub fn raise_irq(&mut self) {
        if self.irq_disabled() {
            return;
        }

        self.handle_exception(ExceptionType::InterruptRequest);
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    pub fn set_halted(&mut self, halted: bool) {
        self.halted = halted;
    }

    pub fn irq_disabled(&self) -> bool {
        self.cpsr.get_bit(Self::IRQ_DISABLE_BIT_INDEX)
    }

    fn handle_exception(&mut self, exception: ExceptionType) {
        log::trace!("entering exception {:?}", exception);

        let instruction_width = if self.thumb_state() { 2 } else { 4 };
        let return_address = match exception {
            // For SWI and Undefined, r15 still addresses the faulting
            // instruction; the handler returns to the next one.
            ExceptionType::SoftwareInterrupt | ExceptionType::Undefined => {
                self.r[15].wrapping_add(instruction_width)
            }
            // For IRQ, r15 already addresses the next instruction to run;
            // the convention is LR = return address + 4.
            ExceptionType::InterruptRequest | ExceptionType::FastInterrupt => {
                self.r[15].wrapping_add(4)
            }
            ExceptionType::Reset => 0,
            ExceptionType::PrefetchAbort | ExceptionType::DataAbort => {
                self.r[15].wrapping_add(4)
            }
        };

        let target_mode = exception.target_mode();
        let old_cpsr = self.cpsr;

        let mut new_cpsr = old_cpsr;
        new_cpsr = new_cpsr.set_bit_range(target_mode.bits(), Self::MODE_BITS_RANGE);
        new_cpsr = new_cpsr.set_bit(Self::IRQ_DISABLE_BIT_INDEX, true);
        new_cpsr = new_cpsr.set_bit(Self::STATE_BIT_INDEX, false);
        if matches!(
            exception,
            ExceptionType::Reset | ExceptionType::FastInterrupt
        ) {
            new_cpsr = new_cpsr.set_bit(Self::FIQ_DISABLE_BIT_INDEX, true);
        }

        self.set_cpsr(new_cpsr);
        self.banked_spsr[target_mode.bank_index()] = old_cpsr;
        self.r[14] = return_address;
        self.r[15] = exception.vector();
        self.pc_written = true;
    }
}

// Register file access.
impl Cpu {
    pub fn read_register(&self, register: Register) -> u32 {
        match register {
            Register::R15 => {
                let pipeline_offset = if self.thumb_state() { 4 } else { 8 };
                self.r[15].wrapping_add(pipeline_offset)
            }
            other => self.r[other.index()],
        }
    }

    pub fn write_register(&mut self, value: u32, register: Register) {
        match register {
            Register::R15 => {
                let aligned = if self.thumb_state() {
                    value & !0b1
                } else {
                    value & !0b11
                };
                self.r[15] = aligned;
                self.pc_written = true;
            }
            other => self.r[other.index()] = value,
        }
    }

    pub fn pc(&self) -> u32 {
        self.r[15]
    }

    pub fn cpsr(&self) -> u32 {
        self.cpsr
    }

    pub fn spsr(&self) -> u32 {
        let mode = self.mode();
        if mode.has_spsr() {
            self.banked_spsr[mode.bank_index()]
        } else {
            // User and System have no SPSR; reads mirror CPSR.
            self.cpsr
        }
    }

    fn write_spsr(&mut self, value: u32) {
        let mode = self.mode();
        if mode.has_spsr() {
            self.banked_spsr[mode.bank_index()] = value;
        }
    }

    pub fn mode(&self) -> CpuMode {
        CpuMode::from_bits(self.cpsr)
    }

    // All CPSR writes funnel through here so a mode-bit change swaps the
    // banked registers exactly once.
    fn set_cpsr(&mut self, value: u32) {
        let old_mode = self.mode();
        let new_mode = CpuMode::from_bits(value);

        if old_mode.bank_index() != new_mode.bank_index() {
            self.banked_r13[old_mode.bank_index()] = self.r[13];
            self.banked_r14[old_mode.bank_index()] = self.r[14];
            self.r[13] = self.banked_r13[new_mode.bank_index()];
            self.r[14] = self.banked_r14[new_mode.bank_index()];
        }

        if (old_mode == CpuMode::Fiq) != (new_mode == CpuMode::Fiq) {
            for (live, shadow) in self.r[8..=12].iter_mut().zip(self.fiq_r8_r12.iter_mut()) {
                std::mem::swap(live, shadow);
            }
        }

        self.cpsr = value;
    }

    // User-bank views for LDM/STM with the S bit.
    fn read_user_register(&self, index: usize) -> u32 {
        match index {
            8..=12 if self.mode() == CpuMode::Fiq => self.fiq_r8_r12[index - 8],
            13 if self.mode().bank_index() != 5 => self.banked_r13[5],
            14 if self.mode().bank_index() != 5 => self.banked_r14[5],
            _ => self.r[index],
        }
    }

    fn write_user_register(&mut self, value: u32, index: usize) {
        match index {
            8..=12 if self.mode() == CpuMode::Fiq => self.fiq_r8_r12[index - 8] = value,
            13 if self.mode().bank_index() != 5 => self.banked_r13[5] = value,
            14 if self.mode().bank_index() != 5 => self.banked_r14[5] = value,
            _ => self.r[index] = value,
        }
    }
}

// Flags and state bits.
impl Cpu {
    fn sign_flag(&self) -> bool {
        self.cpsr.get_bit(Self::SIGN_FLAG_BIT_INDEX)
    }

    fn set_sign_flag(&mut self, set: bool) {
        self.cpsr = self.cpsr.set_bit(Self::SIGN_FLAG_BIT_INDEX, set);
    }

    fn zero_flag(&self) -> bool {
        self.cpsr.get_bit(Self::ZERO_FLAG_BIT_INDEX)
    }

    fn set_zero_flag(&mut self, set: bool) {
        self.cpsr = self.cpsr.set_bit(Self::ZERO_FLAG_BIT_INDEX, set);
    }

    fn carry_flag(&self) -> bool {
        self.cpsr.get_bit(Self::CARRY_FLAG_BIT_INDEX)
    }

    fn set_carry_flag(&mut self, set: bool) {
        self.cpsr = self.cpsr.set_bit(Self::CARRY_FLAG_BIT_INDEX, set);
    }

    fn overflow_flag(&self) -> bool {
        self.cpsr.get_bit(Self::OVERFLOW_FLAG_BIT_INDEX)
    }

    fn set_overflow_flag(&mut self, set: bool) {
        self.cpsr = self.cpsr.set_bit(Self::OVERFLOW_FLAG_BIT_INDEX, set);
    }

    fn thumb_state(&self) -> bool {
        self.cpsr.get_bit(Self::STATE_BIT_INDEX)
    }

    fn set_thumb_state(&mut self, set: bool) {
        self.cpsr = self.cpsr.set_bit(Self::STATE_BIT_INDEX, set);
    }

    fn condition_passed(&self, condition: Condition) -> bool {
        match condition {
            Condition::Equal => self.zero_flag(),
            Condition::NotEqual => !self.zero_flag(),
            Condition::UnsignedHigherOrSame => self.carry_flag(),
            Condition::UnsignedLower => !self.carry_flag(),
            Condition::SignedNegative => self.sign_flag(),
            Condition::SignedPositiveOrZero => !self.sign_flag(),
            Condition::SignedOverflow => self.overflow_flag(),
            Condition::SignedNoOverflow => !self.overflow_flag(),
            Condition::UnsignedHigher => self.carry_flag() && !self.zero_flag(),
            Condition::UnsignedLowerOrSame => !self.carry_flag() || self.zero_flag(),
            Condition::SignedGreaterOrEqual => self.sign_flag() == self.overflow_flag(),
            Condition::SignedLessThan => self.sign_flag() != self.overflow_flag(),
            Condition::SignedGreaterThan => {
                !self.zero_flag() && (self.sign_flag() == self.overflow_flag())
            }
            Condition::SignedLessOrEqual => {
                self.zero_flag() || (self.sign_flag() != self.overflow_flag())
            }
            Condition::Always => true,
            Condition::Never => false,
        }
    }
}

// The barrel shifter. The immediate and register forms differ in their
// treatment of zero amounts: an immediate #0 encodes LSR#32/ASR#32/RRX,
// while a register amount of zero leaves the value and carry untouched.
impl Cpu {
    fn shift_immediate(&self, shift_type: ShiftType, value: u32, amount: u32) -> (u32, bool) {
        match (shift_type, amount) {
            (ShiftType::Lsl, 0) => (value, self.carry_flag()),
            (ShiftType::Lsl, _) => (value << amount, value.get_bit((32 - amount) as usize)),
            (ShiftType::Lsr, 0) => (0, value.get_bit(31)),
            (ShiftType::Lsr, _) => (value >> amount, value.get_bit((amount - 1) as usize)),
            (ShiftType::Asr, 0) => {
                let carry = value.get_bit(31);
                (if carry { !0 } else { 0 }, carry)
            }
            (ShiftType::Asr, _) => (
                ((value as i32) >> amount) as u32,
                value.get_bit((amount - 1) as usize),
            ),
            (ShiftType::Ror, 0) => {
                // RRX: 33-bit rotate through carry.
                let result = (value >> 1).set_bit(31, self.carry_flag());
                (result, value.get_bit(0))
            }
            (ShiftType::Ror, _) => (value.rotate_right(amount), value.get_bit((amount - 1) as usize)),
        }
    }

    fn shift_register(&self, shift_type: ShiftType, value: u32, amount: u32) -> (u32, bool) {
        if amount == 0 {
            return (value, self.carry_flag());
        }

        match shift_type {
            ShiftType::Lsl => {
                if amount < 32 {
                    (value << amount, value.get_bit((32 - amount) as usize))
                } else if amount == 32 {
                    (0, value.get_bit(0))
                } else {
                    (0, false)
                }
            }
            ShiftType::Lsr => {
                if amount < 32 {
                    (value >> amount, value.get_bit((amount - 1) as usize))
                } else if amount == 32 {
                    (0, value.get_bit(31))
                } else {
                    (0, false)
                }
            }
            ShiftType::Asr => {
                if amount < 32 {
                    (
                        ((value as i32) >> amount) as u32,
                        value.get_bit((amount - 1) as usize),
                    )
                } else {
                    let carry = value.get_bit(31);
                    (if carry { !0 } else { 0 }, carry)
                }
            }
            ShiftType::Ror => {
                let effective = amount % 32;
                if effective == 0 {
                    (value, value.get_bit(31))
                } else {
                    (
                        value.rotate_right(effective),
                        value.get_bit((effective - 1) as usize),
                    )
                }
            }
        }
    }

    // Shared ALU core: computes the result, threads carry-in for ADC/SBC and
    // updates NZCV when requested. Returns None for the test operations.
    fn alu(
        &mut self,
        operation: AluOperation,
        first: u32,
        second: u32,
        shifter_carry: bool,
        set_flags: bool,
    ) -> Option<u32> {
        let carry_in = u64::from(self.carry_flag());

        let (result, carry, overflow) = match operation {
            AluOperation::And | AluOperation::Tst => {
                (first & second, shifter_carry, self.overflow_flag())
            }
            AluOperation::Eor | AluOperation::Teq => {
                (first ^ second, shifter_carry, self.overflow_flag())
            }
            AluOperation::Orr => (first | second, shifter_carry, self.overflow_flag()),
            AluOperation::Bic => (first & !second, shifter_carry, self.overflow_flag()),
            AluOperation::Mov => (second, shifter_carry, self.overflow_flag()),
            AluOperation::Mvn => (!second, shifter_carry, self.overflow_flag()),
            AluOperation::Add | AluOperation::Cmn => add_with_carry(first, second, 0),
            AluOperation::Adc => add_with_carry(first, second, carry_in),
            AluOperation::Sub | AluOperation::Cmp => add_with_carry(first, !second, 1),
            AluOperation::Sbc => add_with_carry(first, !second, carry_in),
            AluOperation::Rsb => add_with_carry(second, !first, 1),
            AluOperation::Rsc => add_with_carry(second, !first, carry_in),
        };

        if set_flags {
            self.set_sign_flag(result.get_bit(31));
            self.set_zero_flag(result == 0);
            self.set_carry_flag(carry);
            if operation.is_arithmetic() {
                self.set_overflow_flag(overflow);
            }
        }

        operation.writes_result().then_some(result)
    }
}

// A + B + carry-in with unsigned carry-out and signed overflow. Subtraction
// is A + !B + 1 (or + carry for SBC), which reproduces the ARM borrow
// convention including the ties on equal operands.
fn add_with_carry(first: u32, second: u32, carry_in: u64) -> (u32, bool, bool) {
    let wide = u64::from(first) + u64::from(second) + carry_in;
    let result = wide as u32;

    let carry = wide > u64::from(u32::MAX);
    let overflow = !(first ^ second) & (first ^ result) & 0x8000_0000 != 0;

    (result, carry, overflow)
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, value) in self.r.iter().enumerate() {
            if index % 4 == 0 && index != 0 {
                writeln!(f)?;
            }
            write!(f, "r{:<2}: 0x{:08X}  ", index, value)?;
        }
        writeln!(f)?;
        write!(f, "cpsr: 0x{:08X} ({:?})", self.cpsr, self.mode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_switch_swaps_stack_registers() {
        let mut cpu = Cpu::new();
        cpu.reset(true);
        assert_eq!(cpu.mode(), CpuMode::System);
        assert_eq!(cpu.read_register(Register::R13), 0x0300_7F00);

        cpu.set_cpsr((cpu.cpsr() & !0x1F) | CpuMode::Irq.bits());
        assert_eq!(cpu.read_register(Register::R13), 0x0300_7FA0);

        cpu.set_cpsr((cpu.cpsr() & !0x1F) | CpuMode::System.bits());
        assert_eq!(cpu.read_register(Register::R13), 0x0300_7F00);
    }

    #[test]
    fn mode_round_trip_preserves_low_registers() {
        let mut cpu = Cpu::new();
        cpu.reset(true);

        for index in 0..13 {
            cpu.r[index] = 0x100 + index as u32;
        }

        let old_cpsr = cpu.cpsr();
        cpu.handle_exception(ExceptionType::SoftwareInterrupt);
        assert_eq!(cpu.mode(), CpuMode::Supervisor);
        assert_eq!(cpu.spsr(), old_cpsr);

        cpu.set_cpsr(cpu.spsr());
        assert_eq!(cpu.mode(), CpuMode::System);
        for index in 0..13 {
            assert_eq!(cpu.r[index], 0x100 + index as u32);
        }
    }

    #[test]
    fn fiq_banks_r8_to_r12() {
        let mut cpu = Cpu::new();
        cpu.reset(true);

        cpu.r[8] = 0x1111;
        cpu.r[12] = 0x2222;

        cpu.set_cpsr((cpu.cpsr() & !0x1F) | CpuMode::Fiq.bits());
        cpu.r[8] = 0xAAAA;
        cpu.r[12] = 0xBBBB;

        cpu.set_cpsr((cpu.cpsr() & !0x1F) | CpuMode::System.bits());
        assert_eq!(cpu.r[8], 0x1111);
        assert_eq!(cpu.r[12], 0x2222);
    }

    #[test]
    fn shifter_lsr_zero_is_lsr_32() {
        let cpu = Cpu::new();
        let (result, carry) = cpu.shift_immediate(ShiftType::Lsr, 0x8000_0001, 0);
        assert_eq!(result, 0);
        assert!(carry);
    }

    #[test]
    fn shifter_ror_zero_is_rrx() {
        let mut cpu = Cpu::new();
        cpu.set_carry_flag(true);
        let (result, carry) = cpu.shift_immediate(ShiftType::Ror, 0x2, 0);
        assert_eq!(result, 0x8000_0001);
        assert!(!carry);
    }

    #[test]
    fn shifter_register_form_edge_cases() {
        let mut cpu = Cpu::new();
        cpu.set_carry_flag(true);

        // Amount 0 passes value and carry through unchanged.
        assert_eq!(cpu.shift_register(ShiftType::Lsr, 0x1234, 0), (0x1234, true));

        // LSL #32 leaves only the carry from bit 0.
        assert_eq!(cpu.shift_register(ShiftType::Lsl, 0x1, 32), (0, true));
        assert_eq!(cpu.shift_register(ShiftType::Lsl, 0x2, 33), (0, false));

        // ROR by a multiple of 32 keeps the value with carry = bit 31.
        assert_eq!(
            cpu.shift_register(ShiftType::Ror, 0x8000_0000, 32),
            (0x8000_0000, true)
        );
    }

    #[test]
    fn alu_add_and_sub_flags() {
        let mut cpu = Cpu::new();

        let result = cpu.alu(AluOperation::Add, u32::MAX, 1, false, true);
        assert_eq!(result, Some(0));
        assert!(cpu.zero_flag());
        assert!(cpu.carry_flag());
        assert!(!cpu.overflow_flag());

        let _ = cpu.alu(AluOperation::Cmp, 5, 10, false, true);
        assert!(!cpu.carry_flag()); // borrow
        assert!(cpu.sign_flag());

        let _ = cpu.alu(AluOperation::Cmp, 10, 10, false, true);
        assert!(cpu.carry_flag());
        assert!(cpu.zero_flag());

        let _ = cpu.alu(AluOperation::Add, 0x7FFF_FFFF, 1, false, true);
        assert!(cpu.overflow_flag());
    }

    #[test]
    fn alu_adc_threads_carry() {
        let mut cpu = Cpu::new();
        cpu.set_carry_flag(true);
        let result = cpu.alu(AluOperation::Adc, 0xFFFF_FFFF, 0, false, true);
        assert_eq!(result, Some(0));
        assert!(cpu.carry_flag());

        // SBC with carry set behaves as plain subtraction.
        cpu.set_carry_flag(true);
        let result = cpu.alu(AluOperation::Sbc, 10, 4, false, true);
        assert_eq!(result, Some(6));
        assert!(cpu.carry_flag());

        // SBC with carry clear subtracts one more.
        cpu.set_carry_flag(false);
        let result = cpu.alu(AluOperation::Sbc, 10, 4, false, true);
        assert_eq!(result, Some(5));
    }

    #[test]
    fn inverse_operations_restore_flags() {
        let mut cpu = Cpu::new();

        let _ = cpu.alu(AluOperation::Add, 123, 456, false, true);
        let flags_after_add = cpu.cpsr() >> 28;

        let sum = 123u32 + 456;
        let _ = cpu.alu(AluOperation::Sub, sum, 456, false, true);
        let _ = cpu.alu(AluOperation::Add, 123, 456, false, true);
        assert_eq!(cpu.cpsr() >> 28, flags_after_add);
    }
}
