use std::ops::RangeInclusive;

use crate::{BitManipulation, DataAccess};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    A,
    B,
    Select,
    Start,
    Right,
    Left,
    Up,
    Down,
    R,
    L,
}

impl Key {
    fn bit_index(self) -> usize {
        match self {
            Key::A => 0,
            Key::B => 1,
            Key::Select => 2,
            Key::Start => 3,
            Key::Right => 4,
            Key::Left => 5,
            Key::Up => 6,
            Key::Down => 7,
            Key::R => 8,
            Key::L => 9,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum IrqCondition {
    LogicalOr,
    LogicalAnd,
}

// KEYINPUT is active-low: 0 = pressed, 1 = released.
#[derive(Clone, Debug)]
pub struct Keypad {
    key_status: u16,
    interrupt_control: u16,
}

impl Default for Keypad {
    fn default() -> Self {
        Self {
            key_status: 0x03FF,
            interrupt_control: 0,
        }
    }
}

impl Keypad {
    const KEY_BIT_RANGE: RangeInclusive<usize> = 0..=9;
    const IRQ_ENABLE_BIT_INDEX: usize = 14;
    const IRQ_CONDITION_BIT_INDEX: usize = 15;

    pub fn set_pressed(&mut self, key: Key, pressed: bool) {
        self.key_status = self.key_status.set_bit(key.bit_index(), !pressed);
    }

    pub fn read_key_status<T>(&self, index: u32) -> T
    where
        u16: DataAccess<T>,
    {
        self.key_status.get_data(index)
    }

    pub fn read_interrupt_control<T>(&self, index: u32) -> T
    where
        u16: DataAccess<T>,
    {
        self.interrupt_control.get_data(index)
    }

    pub fn write_interrupt_control<T>(&mut self, value: T, index: u32)
    where
        u16: DataAccess<T>,
    {
        self.interrupt_control = self.interrupt_control.set_data(value, index);
    }

    // Evaluated at step boundaries; the latch itself never raises an IRQ
    // directly.
    pub fn poll_interrupt(&self) -> bool {
        if !self.interrupt_control.get_bit(Self::IRQ_ENABLE_BIT_INDEX) {
            return false;
        }

        let pressed = (!self.key_status).get_bit_range(Self::KEY_BIT_RANGE);
        let selected = self.interrupt_control.get_bit_range(Self::KEY_BIT_RANGE);

        match self.irq_condition() {
            IrqCondition::LogicalOr => (pressed & selected) != 0,
            IrqCondition::LogicalAnd => selected != 0 && (pressed & selected) == selected,
        }
    }

    fn irq_condition(&self) -> IrqCondition {
        if self.interrupt_control.get_bit(Self::IRQ_CONDITION_BIT_INDEX) {
            IrqCondition::LogicalAnd
        } else {
            IrqCondition::LogicalOr
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_low_latch() {
        let mut keypad = Keypad::default();
        assert_eq!(keypad.read_key_status::<u8>(0), 0xFF);

        keypad.set_pressed(Key::A, true);
        assert_eq!(keypad.read_key_status::<u8>(0), 0xFE);
        assert_eq!(keypad.read_key_status::<u8>(1), 0x03);

        keypad.set_pressed(Key::A, false);
        assert_eq!(keypad.read_key_status::<u8>(0), 0xFF);
    }

    #[test]
    fn irq_or_condition() {
        let mut keypad = Keypad::default();
        keypad.write_interrupt_control(0x4003u16, 0); // enable, keys A+B, OR
        assert!(!keypad.poll_interrupt());

        keypad.set_pressed(Key::B, true);
        assert!(keypad.poll_interrupt());
    }

    #[test]
    fn irq_and_condition() {
        let mut keypad = Keypad::default();
        keypad.write_interrupt_control(0xC003u16, 0); // enable, keys A+B, AND
        keypad.set_pressed(Key::A, true);
        assert!(!keypad.poll_interrupt());

        keypad.set_pressed(Key::B, true);
        assert!(keypad.poll_interrupt());
    }
}
