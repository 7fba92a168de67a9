use std::ops::RangeInclusive;

use crate::{BitManipulation, DataAccess};

#[derive(Clone, Copy, Debug)]
enum PrescalerInterval {
    Div1,
    Div64,
    Div256,
    Div1024,
}

impl PrescalerInterval {
    fn divider(self) -> u32 {
        match self {
            PrescalerInterval::Div1 => 1,
            PrescalerInterval::Div64 => 64,
            PrescalerInterval::Div256 => 256,
            PrescalerInterval::Div1024 => 1024,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Timer {
    counter: u16,
    reload: u16,
    control: u16,
    prescaler_phase: u32,
}

impl Timer {
    const PRESCALER_SELECTION_BIT_RANGE: RangeInclusive<usize> = 0..=1;
    const COUNT_UP_TIMING_BIT_INDEX: usize = 2;
    const IRQ_ENABLE_BIT_INDEX: usize = 6;
    const START_STOP_BIT_INDEX: usize = 7;

    // The scheduler hands over whole-instruction cycle batches; `cascade_ticks`
    // is the previous channel's overflow count this step. Returns how many
    // times this channel overflowed.
    pub fn step(&mut self, cycles: u32, cascade_ticks: u32) -> u32 {
        if !self.enabled() {
            return 0;
        }

        let increments = if self.count_up_timing() {
            cascade_ticks
        } else {
            self.prescaler_phase += cycles;
            let divider = self.prescaler_interval().divider();
            let increments = self.prescaler_phase / divider;
            self.prescaler_phase %= divider;
            increments
        };

        let mut overflows = 0;
        for _ in 0..increments {
            let (new_counter, overflow) = self.counter.overflowing_add(1);
            if overflow {
                self.counter = self.reload;
                overflows += 1;
            } else {
                self.counter = new_counter;
            }
        }

        overflows
    }

    pub fn read_counter<T>(&self, index: u32) -> T
    where
        u16: DataAccess<T>,
    {
        self.counter.get_data(index)
    }

    pub fn write_reload<T>(&mut self, value: T, index: u32)
    where
        u16: DataAccess<T>,
    {
        self.reload = self.reload.set_data(value, index);
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

        // A rising enable edge reloads the counter and resets the prescaler
        // phase.
        if !old_enabled && self.enabled() {
            self.counter = self.reload;
            self.prescaler_phase = 0;
        }
    }

    pub fn irq_enabled(&self) -> bool {
        self.control.get_bit(Self::IRQ_ENABLE_BIT_INDEX)
    }

    fn enabled(&self) -> bool {
        self.control.get_bit(Self::START_STOP_BIT_INDEX)
    }

    fn count_up_timing(&self) -> bool {
        self.control.get_bit(Self::COUNT_UP_TIMING_BIT_INDEX)
    }

    fn prescaler_interval(&self) -> PrescalerInterval {
        match self.control.get_bit_range(Self::PRESCALER_SELECTION_BIT_RANGE) {
            0 => PrescalerInterval::Div1,
            1 => PrescalerInterval::Div64,
            2 => PrescalerInterval::Div256,
            3 => PrescalerInterval::Div1024,
            _ => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_timer_ignores_cycles() {
        let mut timer = Timer::default();
        assert_eq!(timer.step(1024, 0), 0);
        assert_eq!(timer.read_counter::<u16>(0), 0);
    }

    #[test]
    fn enable_edge_reloads_counter() {
        let mut timer = Timer::default();
        timer.write_reload(0xFF00u16, 0);
        timer.write_control(0x80u16, 0);
        assert_eq!(timer.read_counter::<u16>(0), 0xFF00);
    }

    #[test]
    fn prescaler_divides_the_clock() {
        let mut timer = Timer::default();
        timer.write_control(0x81u16, 0); // enabled, divide by 64
        timer.step(63, 0);
        assert_eq!(timer.read_counter::<u16>(0), 0);
        timer.step(1, 0);
        assert_eq!(timer.read_counter::<u16>(0), 1);
    }

    #[test]
    fn overflow_reloads_and_reports() {
        let mut timer = Timer::default();
        timer.write_reload(0xFFF0u16, 0);
        timer.write_control(0x80u16, 0);
        assert_eq!(timer.step(0x10, 0), 1);
        assert_eq!(timer.read_counter::<u16>(0), 0xFFF0);
    }

    #[test]
    fn cascade_counts_previous_overflows_only() {
        let mut timer = Timer::default();
        timer.write_control(0x84u16, 0); // enabled, count-up
        assert_eq!(timer.step(4096, 0), 0);
        assert_eq!(timer.read_counter::<u16>(0), 0);

        timer.step(0, 3);
        assert_eq!(timer.read_counter::<u16>(0), 3);
    }

    #[test]
    fn reload_write_takes_effect_on_next_overflow() {
        let mut timer = Timer::default();
        timer.write_control(0x80u16, 0);
        timer.write_reload(0x1234u16, 0);
        assert_eq!(timer.read_counter::<u16>(0), 0);

        timer.step(0x1_0000, 0);
        assert_eq!(timer.read_counter::<u16>(0), 0x1234);
    }
}
