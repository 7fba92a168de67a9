use std::fmt::{self, Display};

use crate::bus::Bus;
use crate::BitManipulation;

use super::{AluOperation, Condition, Cpu, ExceptionType, Register, ShiftType};

#[derive(Clone, Copy, Debug)]
pub(super) enum ThumbOperand {
    Immediate(u32),
    Register(Register),
}

#[derive(Clone, Copy, Debug)]
pub(super) enum ThumbAluOperation {
    And,
    Eor,
    Lsl,
    Lsr,
    Asr,
    Adc,
    Sbc,
    Ror,
    Tst,
    Neg,
    Cmp,
    Cmn,
    Orr,
    Mul,
    Bic,
    Mvn,
}

#[derive(Clone, Copy, Debug)]
pub(super) enum HighRegisterOperation {
    Add,
    Cmp,
    Mov,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum TransferSize {
    Byte,
    Halfword,
    Word,
}

#[derive(Clone, Copy, Debug)]
pub(super) enum ThumbInstruction {
    MoveShifted {
        shift_type: ShiftType,
        amount: u32,
        source: Register,
        destination: Register,
    },
    AddSubtract {
        subtract: bool,
        operand: ThumbOperand,
        source: Register,
        destination: Register,
    },
    AluImmediate {
        operation: AluOperation,
        register: Register,
        value: u32,
    },
    AluRegister {
        operation: ThumbAluOperation,
        source: Register,
        destination: Register,
    },
    HighRegisterOp {
        operation: HighRegisterOperation,
        source: Register,
        destination: Register,
    },
    BranchExchange {
        operand: Register,
    },
    LoadPcRelative {
        destination: Register,
        offset: u32,
    },
    Transfer {
        load: bool,
        size: TransferSize,
        sign_extend: bool,
        base: Register,
        offset: ThumbOperand,
        register: Register,
    },
    TransferSpRelative {
        load: bool,
        register: Register,
        offset: u32,
    },
    LoadAddress {
        from_sp: bool,
        destination: Register,
        offset: u32,
    },
    AdjustStackPointer {
        offset: i32,
    },
    PushPop {
        load: bool,
        register_list: u8,
        include_pc_lr: bool,
    },
    BlockTransfer {
        load: bool,
        base: Register,
        register_list: u8,
    },
    ConditionalBranch {
        condition: Condition,
        offset: i32,
    },
    SoftwareInterrupt {
        comment: u16,
    },
    Branch {
        offset: i32,
    },
    LongBranchPrefix {
        offset: i32,
    },
    LongBranchSuffix {
        offset: u32,
    },
    Undefined {
        opcode: u16,
    },
}

fn low_register(opcode: u16, offset: usize) -> Register {
    Register::from_index(u32::from((opcode >> offset) & 0b111))
}

pub(super) fn decode_thumb(opcode: u16) -> ThumbInstruction {
    match opcode.get_bit_range(13..=15) {
        0b000 => decode_shifted_or_add_subtract(opcode),
        0b001 => decode_alu_immediate(opcode),
        0b010 => decode_mixed_010(opcode),
        0b011 => decode_transfer_immediate(opcode),
        0b100 => decode_halfword_or_sp_relative(opcode),
        0b101 => decode_address_or_stack(opcode),
        0b110 => decode_block_or_conditional(opcode),
        0b111 => decode_branches(opcode),
        _ => unreachable!(),
    }
}

fn decode_shifted_or_add_subtract(opcode: u16) -> ThumbInstruction {
    if opcode.get_bit_range(11..=12) == 0b11 {
        let operand = if opcode.get_bit(10) {
            ThumbOperand::Immediate(u32::from(opcode.get_bit_range(6..=8)))
        } else {
            ThumbOperand::Register(low_register(opcode, 6))
        };

        ThumbInstruction::AddSubtract {
            subtract: opcode.get_bit(9),
            operand,
            source: low_register(opcode, 3),
            destination: low_register(opcode, 0),
        }
    } else {
        let shift_type = match opcode.get_bit_range(11..=12) {
            0 => ShiftType::Lsl,
            1 => ShiftType::Lsr,
            2 => ShiftType::Asr,
            _ => unreachable!(),
        };

        ThumbInstruction::MoveShifted {
            shift_type,
            amount: u32::from(opcode.get_bit_range(6..=10)),
            source: low_register(opcode, 3),
            destination: low_register(opcode, 0),
        }
    }
}

fn decode_alu_immediate(opcode: u16) -> ThumbInstruction {
    let operation = match opcode.get_bit_range(11..=12) {
        0 => AluOperation::Mov,
        1 => AluOperation::Cmp,
        2 => AluOperation::Add,
        3 => AluOperation::Sub,
        _ => unreachable!(),
    };

    ThumbInstruction::AluImmediate {
        operation,
        register: low_register(opcode, 8),
        value: u32::from(opcode.get_bit_range(0..=7)),
    }
}

fn decode_mixed_010(opcode: u16) -> ThumbInstruction {
    if opcode.get_bit_range(10..=15) == 0b010000 {
        let operation = match opcode.get_bit_range(6..=9) {
            0x0 => ThumbAluOperation::And,
            0x1 => ThumbAluOperation::Eor,
            0x2 => ThumbAluOperation::Lsl,
            0x3 => ThumbAluOperation::Lsr,
            0x4 => ThumbAluOperation::Asr,
            0x5 => ThumbAluOperation::Adc,
            0x6 => ThumbAluOperation::Sbc,
            0x7 => ThumbAluOperation::Ror,
            0x8 => ThumbAluOperation::Tst,
            0x9 => ThumbAluOperation::Neg,
            0xA => ThumbAluOperation::Cmp,
            0xB => ThumbAluOperation::Cmn,
            0xC => ThumbAluOperation::Orr,
            0xD => ThumbAluOperation::Mul,
            0xE => ThumbAluOperation::Bic,
            0xF => ThumbAluOperation::Mvn,
            _ => unreachable!(),
        };

        return ThumbInstruction::AluRegister {
            operation,
            source: low_register(opcode, 3),
            destination: low_register(opcode, 0),
        };
    }

    if opcode.get_bit_range(10..=15) == 0b010001 {
        // High-register operations extend both register fields with the H
        // bits.
        let destination =
            Register::from_index(u32::from(opcode.get_bit_range(0..=2))
                | (u32::from(opcode.get_bit(7)) << 3));
        let source = Register::from_index(u32::from(opcode.get_bit_range(3..=6)));

        return match opcode.get_bit_range(8..=9) {
            0 => ThumbInstruction::HighRegisterOp {
                operation: HighRegisterOperation::Add,
                source,
                destination,
            },
            1 => ThumbInstruction::HighRegisterOp {
                operation: HighRegisterOperation::Cmp,
                source,
                destination,
            },
            2 => ThumbInstruction::HighRegisterOp {
                operation: HighRegisterOperation::Mov,
                source,
                destination,
            },
            3 => ThumbInstruction::BranchExchange { operand: source },
            _ => unreachable!(),
        };
    }

    if opcode.get_bit_range(11..=15) == 0b01001 {
        return ThumbInstruction::LoadPcRelative {
            destination: low_register(opcode, 8),
            offset: u32::from(opcode.get_bit_range(0..=7)) * 4,
        };
    }

    // Register-offset transfers, plain (bit 9 clear) or sign-extending
    // (bit 9 set).
    let offset = ThumbOperand::Register(low_register(opcode, 6));
    let base = low_register(opcode, 3);
    let register = low_register(opcode, 0);

    if opcode.get_bit(9) {
        let (load, size, sign_extend) = match opcode.get_bit_range(10..=11) {
            0b00 => (false, TransferSize::Halfword, false), // strh
            0b01 => (true, TransferSize::Byte, true),       // ldsb
            0b10 => (true, TransferSize::Halfword, false),  // ldrh
            0b11 => (true, TransferSize::Halfword, true),   // ldsh
            _ => unreachable!(),
        };

        ThumbInstruction::Transfer {
            load,
            size,
            sign_extend,
            base,
            offset,
            register,
        }
    } else {
        let size = if opcode.get_bit(10) {
            TransferSize::Byte
        } else {
            TransferSize::Word
        };

        ThumbInstruction::Transfer {
            load: opcode.get_bit(11),
            size,
            sign_extend: false,
            base,
            offset,
            register,
        }
    }
}

fn decode_transfer_immediate(opcode: u16) -> ThumbInstruction {
    let byte = opcode.get_bit(12);
    let offset = u32::from(opcode.get_bit_range(6..=10));
    let offset = if byte { offset } else { offset * 4 };

    ThumbInstruction::Transfer {
        load: opcode.get_bit(11),
        size: if byte {
            TransferSize::Byte
        } else {
            TransferSize::Word
        },
        sign_extend: false,
        base: low_register(opcode, 3),
        offset: ThumbOperand::Immediate(offset),
        register: low_register(opcode, 0),
    }
}

fn decode_halfword_or_sp_relative(opcode: u16) -> ThumbInstruction {
    if !opcode.get_bit(12) {
        ThumbInstruction::Transfer {
            load: opcode.get_bit(11),
            size: TransferSize::Halfword,
            sign_extend: false,
            base: low_register(opcode, 3),
            offset: ThumbOperand::Immediate(u32::from(opcode.get_bit_range(6..=10)) * 2),
            register: low_register(opcode, 0),
        }
    } else {
        ThumbInstruction::TransferSpRelative {
            load: opcode.get_bit(11),
            register: low_register(opcode, 8),
            offset: u32::from(opcode.get_bit_range(0..=7)) * 4,
        }
    }
}

fn decode_address_or_stack(opcode: u16) -> ThumbInstruction {
    if !opcode.get_bit(12) {
        return ThumbInstruction::LoadAddress {
            from_sp: opcode.get_bit(11),
            destination: low_register(opcode, 8),
            offset: u32::from(opcode.get_bit_range(0..=7)) * 4,
        };
    }

    if opcode.get_bit_range(8..=15) == 0b1011_0000 {
        let magnitude = i32::from(opcode.get_bit_range(0..=6)) * 4;
        let offset = if opcode.get_bit(7) {
            -magnitude
        } else {
            magnitude
        };

        return ThumbInstruction::AdjustStackPointer { offset };
    }

    if opcode.get_bit_range(9..=10) == 0b10 {
        return ThumbInstruction::PushPop {
            load: opcode.get_bit(11),
            register_list: opcode.get_bit_range(0..=7) as u8,
            include_pc_lr: opcode.get_bit(8),
        };
    }

    ThumbInstruction::Undefined { opcode }
}

fn decode_block_or_conditional(opcode: u16) -> ThumbInstruction {
    if !opcode.get_bit(12) {
        return ThumbInstruction::BlockTransfer {
            load: opcode.get_bit(11),
            base: low_register(opcode, 8),
            register_list: opcode.get_bit_range(0..=7) as u8,
        };
    }

    match opcode.get_bit_range(8..=11) {
        0xF => ThumbInstruction::SoftwareInterrupt {
            comment: opcode.get_bit_range(0..=7),
        },
        0xE => ThumbInstruction::Undefined { opcode },
        condition => {
            // 8-bit signed offset in halfwords.
            let offset = i32::from(opcode.get_bit_range(0..=7) as u8 as i8) * 2;

            ThumbInstruction::ConditionalBranch {
                condition: Condition::from_bits(u32::from(condition)),
                offset,
            }
        }
    }
}

fn decode_branches(opcode: u16) -> ThumbInstruction {
    let offset_11 = opcode.get_bit_range(0..=10);

    match opcode.get_bit_range(11..=12) {
        0b00 => {
            // 11-bit signed offset in halfwords.
            let offset = ((i32::from(offset_11) << 21) >> 21) * 2;
            ThumbInstruction::Branch { offset }
        }
        0b10 => {
            let offset = ((i32::from(offset_11) << 21) >> 21) << 12;
            ThumbInstruction::LongBranchPrefix { offset }
        }
        0b11 => ThumbInstruction::LongBranchSuffix {
            offset: u32::from(offset_11) * 2,
        },
        // The 01 encoding is BLX on later architectures.
        _ => ThumbInstruction::Undefined { opcode },
    }
}

impl ThumbInstruction {
    pub(super) fn timing(&self) -> u32 {
        match self {
            ThumbInstruction::MoveShifted { .. }
            | ThumbInstruction::AddSubtract { .. }
            | ThumbInstruction::AluImmediate { .. }
            | ThumbInstruction::LoadAddress { .. }
            | ThumbInstruction::AdjustStackPointer { .. }
            | ThumbInstruction::LongBranchPrefix { .. } => 1,
            ThumbInstruction::AluRegister { operation, .. } => match operation {
                ThumbAluOperation::Lsl
                | ThumbAluOperation::Lsr
                | ThumbAluOperation::Asr
                | ThumbAluOperation::Ror
                | ThumbAluOperation::Mul => 2,
                _ => 1,
            },
            ThumbInstruction::HighRegisterOp { destination, .. } => {
                if matches!(destination, Register::R15) {
                    3
                } else {
                    1
                }
            }
            ThumbInstruction::BranchExchange { .. }
            | ThumbInstruction::Branch { .. }
            | ThumbInstruction::ConditionalBranch { .. }
            | ThumbInstruction::SoftwareInterrupt { .. }
            | ThumbInstruction::LongBranchSuffix { .. }
            | ThumbInstruction::Undefined { .. } => 3,
            ThumbInstruction::LoadPcRelative { .. } => 3,
            ThumbInstruction::Transfer { load, .. }
            | ThumbInstruction::TransferSpRelative { load, .. } => {
                if *load {
                    3
                } else {
                    2
                }
            }
            ThumbInstruction::PushPop { register_list, .. }
            | ThumbInstruction::BlockTransfer { register_list, .. } => {
                u32::from(register_list.count_ones()) + 2
            }
        }
    }
}

impl Cpu {
    pub(super) fn execute_thumb(&mut self, bus: &mut Bus, instruction: ThumbInstruction) -> u32 {
        let cycles = instruction.timing();

        match instruction {
            ThumbInstruction::MoveShifted {
                shift_type,
                amount,
                source,
                destination,
            } => {
                let value = self.read_register(source);
                let (result, carry) = self.shift_immediate(shift_type, value, amount);
                self.write_register(result, destination);
                self.set_sign_flag(result.get_bit(31));
                self.set_zero_flag(result == 0);
                self.set_carry_flag(carry);
            }
            ThumbInstruction::AddSubtract {
                subtract,
                operand,
                source,
                destination,
            } => {
                let first = self.read_register(source);
                let second = match operand {
                    ThumbOperand::Immediate(value) => value,
                    ThumbOperand::Register(register) => self.read_register(register),
                };

                let operation = if subtract {
                    AluOperation::Sub
                } else {
                    AluOperation::Add
                };
                if let Some(result) = self.alu(operation, first, second, false, true) {
                    self.write_register(result, destination);
                }
            }
            ThumbInstruction::AluImmediate {
                operation,
                register,
                value,
            } => {
                // MOV leaves carry alone; there is no shifter here.
                let carry = self.carry_flag();
                let first = self.read_register(register);
                if let Some(result) = self.alu(operation, first, value, carry, true) {
                    self.write_register(result, register);
                }
            }
            ThumbInstruction::AluRegister {
                operation,
                source,
                destination,
            } => self.execute_thumb_alu_register(operation, source, destination),
            ThumbInstruction::HighRegisterOp {
                operation,
                source,
                destination,
            } => self.execute_thumb_high_register(operation, source, destination),
            ThumbInstruction::BranchExchange { operand } => {
                let target = self.read_register(operand);
                self.set_thumb_state(target.get_bit(0));
                self.write_register(target, Register::R15);
            }
            ThumbInstruction::LoadPcRelative {
                destination,
                offset,
            } => {
                // The PC value is word-aligned for the address calculation.
                let base = self.read_register(Register::R15) & !0b11;
                let value = bus.read_word(base.wrapping_add(offset));
                self.write_register(value, destination);
            }
            ThumbInstruction::Transfer {
                load,
                size,
                sign_extend,
                base,
                offset,
                register,
            } => self.execute_thumb_transfer(bus, load, size, sign_extend, base, offset, register),
            ThumbInstruction::TransferSpRelative {
                load,
                register,
                offset,
            } => {
                let address = self.read_register(Register::R13).wrapping_add(offset);
                if load {
                    let value = bus.read_word(address);
                    self.write_register(value, register);
                } else {
                    bus.write_word(self.read_register(register), address);
                }
            }
            ThumbInstruction::LoadAddress {
                from_sp,
                destination,
                offset,
            } => {
                let base = if from_sp {
                    self.read_register(Register::R13)
                } else {
                    self.read_register(Register::R15) & !0b11
                };
                self.write_register(base.wrapping_add(offset), destination);
            }
            ThumbInstruction::AdjustStackPointer { offset } => {
                let sp = self.read_register(Register::R13);
                self.write_register(sp.wrapping_add(offset as u32), Register::R13);
            }
            ThumbInstruction::PushPop {
                load,
                register_list,
                include_pc_lr,
            } => self.execute_thumb_push_pop(bus, load, register_list, include_pc_lr),
            ThumbInstruction::BlockTransfer {
                load,
                base,
                register_list,
            } => self.execute_thumb_block_transfer(bus, load, base, register_list),
            ThumbInstruction::ConditionalBranch { condition, offset } => {
                if !self.condition_passed(condition) {
                    return 1;
                }

                let target = self.read_register(Register::R15).wrapping_add(offset as u32);
                self.write_register(target, Register::R15);
            }
            ThumbInstruction::SoftwareInterrupt { comment } => {
                log::trace!("swi 0x{:02X}", comment);
                self.handle_exception(ExceptionType::SoftwareInterrupt);
            }
            ThumbInstruction::Branch { offset } => {
                let target = self.read_register(Register::R15).wrapping_add(offset as u32);
                self.write_register(target, Register::R15);
            }
            ThumbInstruction::LongBranchPrefix { offset } => {
                let target = self.read_register(Register::R15).wrapping_add(offset as u32);
                self.write_register(target, Register::R14);
            }
            ThumbInstruction::LongBranchSuffix { offset } => {
                let target = self.read_register(Register::R14).wrapping_add(offset);
                // The return address points past this half of the pair, with
                // bit 0 flagging Thumb state.
                let return_address = self.pc().wrapping_add(2) | 1;

                self.write_register(return_address, Register::R14);
                self.write_register(target, Register::R15);
            }
            ThumbInstruction::Undefined { opcode } => {
                log::debug!("undefined Thumb opcode 0x{:04X}", opcode);
                self.handle_exception(ExceptionType::Undefined);
            }
        }

        cycles
    }

    fn execute_thumb_alu_register(
        &mut self,
        operation: ThumbAluOperation,
        source: Register,
        destination: Register,
    ) {
        let source_value = self.read_register(source);
        let destination_value = self.read_register(destination);

        let mapped = match operation {
            ThumbAluOperation::And => AluOperation::And,
            ThumbAluOperation::Eor => AluOperation::Eor,
            ThumbAluOperation::Adc => AluOperation::Adc,
            ThumbAluOperation::Sbc => AluOperation::Sbc,
            ThumbAluOperation::Tst => AluOperation::Tst,
            ThumbAluOperation::Cmp => AluOperation::Cmp,
            ThumbAluOperation::Cmn => AluOperation::Cmn,
            ThumbAluOperation::Orr => AluOperation::Orr,
            ThumbAluOperation::Bic => AluOperation::Bic,
            ThumbAluOperation::Mvn => AluOperation::Mvn,
            ThumbAluOperation::Lsl | ThumbAluOperation::Lsr | ThumbAluOperation::Asr
            | ThumbAluOperation::Ror => {
                let shift_type = match operation {
                    ThumbAluOperation::Lsl => ShiftType::Lsl,
                    ThumbAluOperation::Lsr => ShiftType::Lsr,
                    ThumbAluOperation::Asr => ShiftType::Asr,
                    ThumbAluOperation::Ror => ShiftType::Ror,
                    _ => unreachable!(),
                };

                let amount = source_value & 0xFF;
                let (result, carry) =
                    self.shift_register(shift_type, destination_value, amount);
                self.write_register(result, destination);
                self.set_sign_flag(result.get_bit(31));
                self.set_zero_flag(result == 0);
                self.set_carry_flag(carry);
                return;
            }
            ThumbAluOperation::Neg => {
                if let Some(result) = self.alu(AluOperation::Rsb, source_value, 0, false, true) {
                    self.write_register(result, destination);
                }
                return;
            }
            ThumbAluOperation::Mul => {
                let result = destination_value.wrapping_mul(source_value);
                self.write_register(result, destination);
                self.set_sign_flag(result.get_bit(31));
                self.set_zero_flag(result == 0);
                return;
            }
        };

        let carry = self.carry_flag();
        if let Some(result) = self.alu(mapped, destination_value, source_value, carry, true) {
            self.write_register(result, destination);
        }
    }

    fn execute_thumb_high_register(
        &mut self,
        operation: HighRegisterOperation,
        source: Register,
        destination: Register,
    ) {
        let source_value = self.read_register(source);

        match operation {
            HighRegisterOperation::Add => {
                let result = self.read_register(destination).wrapping_add(source_value);
                self.write_register(result, destination);
            }
            HighRegisterOperation::Cmp => {
                let first = self.read_register(destination);
                let _ = self.alu(AluOperation::Cmp, first, source_value, false, true);
            }
            HighRegisterOperation::Mov => {
                self.write_register(source_value, destination);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn execute_thumb_transfer(
        &mut self,
        bus: &mut Bus,
        load: bool,
        size: TransferSize,
        sign_extend: bool,
        base: Register,
        offset: ThumbOperand,
        register: Register,
    ) {
        let offset_value = match offset {
            ThumbOperand::Immediate(value) => value,
            ThumbOperand::Register(offset_register) => self.read_register(offset_register),
        };

        let address = self.read_register(base).wrapping_add(offset_value);

        if load {
            let value = match (size, sign_extend) {
                (TransferSize::Byte, false) => u32::from(bus.read_byte(address)),
                (TransferSize::Byte, true) => bus.read_byte(address) as i8 as i32 as u32,
                (TransferSize::Halfword, false) => u32::from(bus.read_halfword(address)),
                (TransferSize::Halfword, true) => bus.read_halfword(address) as i16 as i32 as u32,
                (TransferSize::Word, _) => bus.read_word(address),
            };
            self.write_register(value, register);
        } else {
            let value = self.read_register(register);
            match size {
                TransferSize::Byte => bus.write_byte(value as u8, address),
                TransferSize::Halfword => bus.write_halfword(value as u16, address),
                TransferSize::Word => bus.write_word(value, address),
            }
        }
    }

    fn execute_thumb_push_pop(
        &mut self,
        bus: &mut Bus,
        load: bool,
        register_list: u8,
        include_pc_lr: bool,
    ) {
        let count = register_list.count_ones() + u32::from(include_pc_lr);
        let sp = self.read_register(Register::R13);

        if load {
            // POP: ascending loads from SP, PC last.
            let mut address = sp;
            for index in 0..8 {
                if !register_list.get_bit(index) {
                    continue;
                }
                let value = bus.read_word(address & !0b11);
                self.write_register(value, Register::from_index(index as u32));
                address = address.wrapping_add(4);
            }

            if include_pc_lr {
                let value = bus.read_word(address & !0b11);
                self.write_register(value & !0b1, Register::R15);
                address = address.wrapping_add(4);
            }

            self.write_register(address, Register::R13);
        } else {
            // PUSH: pre-decrement, lowest register at the lowest address,
            // LR on top.
            let new_sp = sp.wrapping_sub(4 * count);
            let mut address = new_sp;

            for index in 0..8 {
                if !register_list.get_bit(index) {
                    continue;
                }
                bus.write_word(self.read_register(Register::from_index(index as u32)), address & !0b11);
                address = address.wrapping_add(4);
            }

            if include_pc_lr {
                bus.write_word(self.read_register(Register::R14), address & !0b11);
            }

            self.write_register(new_sp, Register::R13);
        }
    }

    fn execute_thumb_block_transfer(
        &mut self,
        bus: &mut Bus,
        load: bool,
        base: Register,
        register_list: u8,
    ) {
        if register_list == 0 {
            log::warn!("thumb block transfer with an empty register list, skipping");
            return;
        }

        let base_value = self.read_register(base);
        let mut address = base_value;
        let final_base = base_value.wrapping_add(4 * register_list.count_ones());

        for index in 0..8 {
            if !register_list.get_bit(index) {
                continue;
            }

            if load {
                let value = bus.read_word(address & !0b11);
                self.write_register(value, Register::from_index(index as u32));
            } else {
                bus.write_word(self.read_register(Register::from_index(index as u32)), address & !0b11);
            }
            address = address.wrapping_add(4);
        }

        // Write back unless a load put a new value into the base register.
        if !(load && register_list.get_bit(base.index())) {
            self.write_register(final_base, base);
        }
    }
}

impl Display for ThumbInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThumbInstruction::MoveShifted {
                shift_type,
                amount,
                source,
                destination,
            } => write!(f, "{} {}, {}, #{}", shift_type, destination, source, amount),
            ThumbInstruction::AddSubtract {
                subtract,
                operand,
                source,
                destination,
            } => {
                let mnemonic = if *subtract { "sub" } else { "add" };
                match operand {
                    ThumbOperand::Immediate(value) => {
                        write!(f, "{} {}, {}, #{}", mnemonic, destination, source, value)
                    }
                    ThumbOperand::Register(register) => {
                        write!(f, "{} {}, {}, {}", mnemonic, destination, source, register)
                    }
                }
            }
            ThumbInstruction::AluImmediate {
                operation,
                register,
                value,
            } => write!(f, "{} {}, #{}", operation, register, value),
            ThumbInstruction::AluRegister {
                operation,
                source,
                destination,
            } => write!(f, "{:?} {}, {}", operation, destination, source),
            ThumbInstruction::HighRegisterOp {
                operation,
                source,
                destination,
            } => write!(f, "{:?} {}, {}", operation, destination, source),
            ThumbInstruction::BranchExchange { operand } => write!(f, "bx {}", operand),
            ThumbInstruction::LoadPcRelative {
                destination,
                offset,
            } => write!(f, "ldr {}, [pc, #{}]", destination, offset),
            ThumbInstruction::Transfer {
                load,
                size,
                base,
                register,
                ..
            } => {
                let mnemonic = match (load, size) {
                    (true, TransferSize::Word) => "ldr",
                    (true, TransferSize::Halfword) => "ldrh",
                    (true, TransferSize::Byte) => "ldrb",
                    (false, TransferSize::Word) => "str",
                    (false, TransferSize::Halfword) => "strh",
                    (false, TransferSize::Byte) => "strb",
                };
                write!(f, "{} {}, [{}]", mnemonic, register, base)
            }
            ThumbInstruction::TransferSpRelative {
                load,
                register,
                offset,
            } => {
                let mnemonic = if *load { "ldr" } else { "str" };
                write!(f, "{} {}, [sp, #{}]", mnemonic, register, offset)
            }
            ThumbInstruction::LoadAddress {
                from_sp,
                destination,
                offset,
            } => {
                let base = if *from_sp { "sp" } else { "pc" };
                write!(f, "add {}, {}, #{}", destination, base, offset)
            }
            ThumbInstruction::AdjustStackPointer { offset } => {
                write!(f, "add sp, #{}", offset)
            }
            ThumbInstruction::PushPop {
                load,
                register_list,
                include_pc_lr,
            } => {
                let mnemonic = if *load { "pop" } else { "push" };
                write!(f, "{} 0x{:02X} ({})", mnemonic, register_list, include_pc_lr)
            }
            ThumbInstruction::BlockTransfer {
                load,
                base,
                register_list,
            } => {
                let mnemonic = if *load { "ldmia" } else { "stmia" };
                write!(f, "{} {}!, 0x{:02X}", mnemonic, base, register_list)
            }
            ThumbInstruction::ConditionalBranch { condition, offset } => {
                write!(f, "b{:?} {:+}", condition, offset)
            }
            ThumbInstruction::SoftwareInterrupt { comment } => write!(f, "swi 0x{:02X}", comment),
            ThumbInstruction::Branch { offset } => write!(f, "b {:+}", offset),
            ThumbInstruction::LongBranchPrefix { offset } => write!(f, "bl.hi {:+}", offset),
            ThumbInstruction::LongBranchSuffix { offset } => write!(f, "bl.lo #{}", offset),
            ThumbInstruction::Undefined { opcode } => write!(f, "undefined 0x{:04X}", opcode),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_move_shifted_and_add_subtract() {
        // lsl r0, r1, #4
        assert!(matches!(
            decode_thumb(0x0108),
            ThumbInstruction::MoveShifted {
                shift_type: ShiftType::Lsl,
                amount: 4,
                source: Register::R1,
                destination: Register::R0,
            }
        ));

        // add r0, r0, r1
        assert!(matches!(
            decode_thumb(0x1840),
            ThumbInstruction::AddSubtract {
                subtract: false,
                operand: ThumbOperand::Register(Register::R1),
                source: Register::R0,
                destination: Register::R0,
            }
        ));

        // sub r2, r3, #5
        assert!(matches!(
            decode_thumb(0x1F5A),
            ThumbInstruction::AddSubtract {
                subtract: true,
                operand: ThumbOperand::Immediate(5),
                source: Register::R3,
                destination: Register::R2,
            }
        ));
    }

    #[test]
    fn decodes_immediate_alu() {
        // mov r0, #5
        assert!(matches!(
            decode_thumb(0x2005),
            ThumbInstruction::AluImmediate {
                operation: AluOperation::Mov,
                register: Register::R0,
                value: 5,
            }
        ));

        // cmp r1, #0xFF
        assert!(matches!(
            decode_thumb(0x29FF),
            ThumbInstruction::AluImmediate {
                operation: AluOperation::Cmp,
                register: Register::R1,
                value: 0xFF,
            }
        ));
    }

    #[test]
    fn decodes_high_register_and_bx() {
        // mov r8, r0
        assert!(matches!(
            decode_thumb(0x4680),
            ThumbInstruction::HighRegisterOp {
                operation: HighRegisterOperation::Mov,
                source: Register::R0,
                destination: Register::R8,
            }
        ));

        // bx r14
        assert!(matches!(
            decode_thumb(0x4770),
            ThumbInstruction::BranchExchange {
                operand: Register::R14
            }
        ));
    }

    #[test]
    fn decodes_loads_and_stores() {
        // ldr r0, [pc, #16]
        assert!(matches!(
            decode_thumb(0x4804),
            ThumbInstruction::LoadPcRelative {
                destination: Register::R0,
                offset: 16,
            }
        ));

        // str r1, [r2, #4]
        assert!(matches!(
            decode_thumb(0x6051),
            ThumbInstruction::Transfer {
                load: false,
                size: TransferSize::Word,
                base: Register::R2,
                offset: ThumbOperand::Immediate(4),
                register: Register::R1,
                ..
            }
        ));

        // ldrh r3, [r4, r5]
        assert!(matches!(
            decode_thumb(0x5B63),
            ThumbInstruction::Transfer {
                load: true,
                size: TransferSize::Halfword,
                sign_extend: false,
                base: Register::R4,
                offset: ThumbOperand::Register(Register::R5),
                register: Register::R3,
            }
        ));
    }

    #[test]
    fn decodes_stack_operations() {
        // push {r0, r1, lr}
        assert!(matches!(
            decode_thumb(0xB503),
            ThumbInstruction::PushPop {
                load: false,
                register_list: 0b11,
                include_pc_lr: true,
            }
        ));

        // pop {r7, pc}
        assert!(matches!(
            decode_thumb(0xBD80),
            ThumbInstruction::PushPop {
                load: true,
                register_list: 0x80,
                include_pc_lr: true,
            }
        ));

        // add sp, #-24
        assert!(matches!(
            decode_thumb(0xB086),
            ThumbInstruction::AdjustStackPointer { offset: -24 }
        ));
    }

    #[test]
    fn decodes_branches() {
        // beq +4 (offset encoded as 2)
        assert!(matches!(
            decode_thumb(0xD002),
            ThumbInstruction::ConditionalBranch {
                condition: Condition::Equal,
                offset: 4,
            }
        ));

        // b -2
        assert!(matches!(
            decode_thumb(0xE7FF),
            ThumbInstruction::Branch { offset: -2 }
        ));

        // swi 0x12
        assert!(matches!(
            decode_thumb(0xDF12),
            ThumbInstruction::SoftwareInterrupt { comment: 0x12 }
        ));

        // long branch pair
        assert!(matches!(
            decode_thumb(0xF000),
            ThumbInstruction::LongBranchPrefix { offset: 0 }
        ));
        assert!(matches!(
            decode_thumb(0xF801),
            ThumbInstruction::LongBranchSuffix { offset: 2 }
        ));
    }
}
