//! Counter gating.
//!
//! The blanking pulses come from the EE side of the machine and are delivered as explicit edge
//! calls. Hblank edges gate counters 0 and 3 and clock the hblank driven counters, vblank edges
//! gate counter 1 and drive the per-frame interrupt causes.

use crate::system::{System, cdvd, counters, intc::Interrupt};
use counters::GateMode;

const HBLANK_GATED: [usize; 2] = [0, 3];
const VBLANK_GATED: [usize; 1] = [1];
const HBLANK_CLOCKED: [usize; 2] = [1, 3];

fn gate_start(sys: &mut System, index: usize) {
    let now = sys.scheduler.elapsed();
    let counter = &mut sys.counters.counters[index];
    if !counter.mode.gate_enable() {
        return;
    }

    match counter.mode.gate_mode() {
        GateMode::PauseDuringGate => {
            // a second start edge without an end in between must not disturb the snapshot
            if !counter.stopped {
                counter.resync(now);
                counter.stopped = true;
            }
        }
        GateMode::ResetAtGateEnd => (),
        GateMode::CountDuringGate => {
            counter.count = 0;
            counter.anchor = now;
            counter.stopped = false;
        }
        GateMode::HoldUntilGateStart => {
            if counter.stopped {
                counter.count = 0;
                counter.anchor = now;
                counter.stopped = false;
            }
        }
    }
}

fn gate_end(sys: &mut System, index: usize) {
    let now = sys.scheduler.elapsed();
    let counter = &mut sys.counters.counters[index];
    if !counter.mode.gate_enable() {
        return;
    }

    match counter.mode.gate_mode() {
        GateMode::PauseDuringGate | GateMode::ResetAtGateEnd => {
            counter.count = 0;
            counter.anchor = now;
            counter.stopped = false;
        }
        GateMode::CountDuringGate => {
            if !counter.stopped {
                counter.resync(now);
                counter.stopped = true;
            }
        }
        GateMode::HoldUntilGateStart => (),
    }
}

impl System {
    /// Delivers an hblank-active edge.
    pub fn hblank_start(&mut self) {
        for index in HBLANK_GATED {
            gate_start(self, index);
        }

        for index in HBLANK_CLOCKED {
            counters::hblank_tick(self, index);
        }

        counters::predict_next_event(self);
    }

    /// Delivers an hblank-inactive edge.
    pub fn hblank_end(&mut self) {
        for index in HBLANK_GATED {
            gate_end(self, index);
        }

        counters::predict_next_event(self);
    }

    /// Delivers a vblank-active edge.
    pub fn vblank_start(&mut self) {
        for index in VBLANK_GATED {
            gate_start(self, index);
        }

        cdvd::vsync(self);
        self.raise_interrupt(Interrupt::VBlankStart);
        counters::predict_next_event(self);
    }

    /// Delivers a vblank-inactive edge.
    pub fn vblank_end(&mut self) {
        for index in VBLANK_GATED {
            gate_end(self, index);
        }

        self.raise_interrupt(Interrupt::VBlankEnd);
        counters::predict_next_event(self);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::system::{Config, Modules, System, counters::CounterMode};

    fn system() -> System {
        System::new(Modules::default(), Config::default())
    }

    fn run(sys: &mut System, cycles: u64) {
        sys.scheduler.advance(r3000::Cycles(cycles));
        sys.process_events();
    }

    #[test]
    fn gate_mode_0_pauses_during_gate() {
        let mut sys = system();
        counters::write_mode(&mut sys, 0, CounterMode::default().with_gate_enable(true).to_bits());

        // gated counters hold until the first edge
        run(&mut sys, 100);
        assert_eq!(counters::read_count(&mut sys, 0), 0);

        sys.hblank_end();
        run(&mut sys, 100);
        assert_eq!(counters::read_count(&mut sys, 0), 100);

        sys.hblank_start();
        run(&mut sys, 100);
        assert_eq!(counters::read_count(&mut sys, 0), 100);

        // a repeated start edge must not disturb the snapshot
        sys.hblank_start();
        assert_eq!(counters::read_count(&mut sys, 0), 100);

        sys.hblank_end();
        run(&mut sys, 30);
        assert_eq!(counters::read_count(&mut sys, 0), 30);
    }

    #[test]
    fn gate_mode_2_counts_only_during_gate() {
        let mut sys = system();
        counters::write_mode(
            &mut sys,
            1,
            CounterMode::default()
                .with_gate_enable(true)
                .with_gate_mode(counters::GateMode::CountDuringGate)
                .to_bits(),
        );

        sys.vblank_start();
        run(&mut sys, 50);
        assert_eq!(counters::read_count(&mut sys, 1), 50);

        sys.vblank_end();
        run(&mut sys, 50);
        assert_eq!(counters::read_count(&mut sys, 1), 50);

        sys.vblank_start();
        assert_eq!(counters::read_count(&mut sys, 1), 0);
    }

    #[test]
    fn gate_mode_3_holds_until_first_gate() {
        let mut sys = system();
        counters::write_mode(
            &mut sys,
            3,
            CounterMode::default()
                .with_gate_enable(true)
                .with_gate_mode(counters::GateMode::HoldUntilGateStart)
                .to_bits(),
        );

        run(&mut sys, 100);
        assert_eq!(counters::read_count(&mut sys, 3), 0);

        sys.hblank_start();
        run(&mut sys, 100);
        assert_eq!(counters::read_count(&mut sys, 3), 100);

        // later edges are no-ops
        sys.hblank_end();
        sys.hblank_start();
        run(&mut sys, 100);
        assert_eq!(counters::read_count(&mut sys, 3), 200);
    }

    #[test]
    fn hblank_clocked_counter_gated_by_hblank() {
        let mut sys = system();
        counters::write_mode(
            &mut sys,
            3,
            CounterMode::default()
                .with_gate_enable(true)
                .with_gate_mode(counters::GateMode::ResetAtGateEnd)
                .with_alt_source(true)
                .to_bits(),
        );

        for _ in 0..100 {
            sys.hblank_start();
            run(&mut sys, 1000);
            sys.hblank_end();
            run(&mut sys, 1000);
        }
        sys.hblank_start();

        // mode 1 resets at every gate end, then the counter ticks once on the next start edge
        assert_eq!(counters::read_count(&mut sys, 3), 1);
        assert!(!sys.intc.stat.timer3());
    }

    #[test]
    fn ungated_hblank_counter_counts_pulses() {
        let mut sys = system();
        counters::write_mode(&mut sys, 1, CounterMode::default().with_alt_source(true).to_bits());

        for _ in 0..42 {
            sys.hblank_start();
            sys.hblank_end();
        }
        assert_eq!(counters::read_count(&mut sys, 1), 42);
    }
}
