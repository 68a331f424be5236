//! The IEEE 1149.1 TAP state machine: [`TapWalker`] drives a queue of
//! [`Leg`]s through it one [`TapWalker::step`] at a time, shifting bits
//! through [`crate::pins::phy_sync`].

use std::collections::VecDeque;
use std::time::Duration;

use tracing::debug;

use crate::error::{InvariantError, Result};
use crate::pins::{phy_sync, PinDriver};

/// One TAP traversal kind. The shift direction (LSB- vs MSB-first) and
/// whether TDO is captured are properties of the variant, not of how the
/// caller happened to encode the bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegKind {
    /// Ordinary DR scan, LSB-first, TDO captured.
    Dr,
    /// Ordinary IR scan, LSB-first.
    Ir,
    /// IR scan that pauses in Pause-IR after Exit1 instead of going straight
    /// to Update.
    Irp,
    /// IR scan that skips the RunTestIdle dwell before the *next* leg via
    /// the shortcut rule (see [`TapWalker::apply_shortcut`]).
    Ird,
    /// DR config: MSB-first, write-only fast path. TDO is discarded.
    Drc,
    /// DR recovery: identical wire behavior to [`LegKind::Dr`], but the
    /// captured TDO is additionally exposed as `last_readdata`.
    Drr,
    /// DR SPI: MSB-first fast path that still captures TDO.
    Drs,
    /// TMS reset: drive TMS=1 for `tms_reset_num` cycles.
    Rs,
    /// 5 ms idle delay.
    Dl,
    /// One idle cycle in Run-Test/Idle.
    Id,
}

impl LegKind {
    fn captures_tdo(self) -> bool {
        matches!(self, LegKind::Dr | LegKind::Drr | LegKind::Drs)
    }

    fn is_readout(self) -> bool {
        matches!(self, LegKind::Drr | LegKind::Drs)
    }

    fn msb_first(self) -> bool {
        matches!(self, LegKind::Drc | LegKind::Drs)
    }

    /// DRC/DRS/DRR are parsed into legs (the grammar fully describes their
    /// intended semantics) but their Shift-state bodies are not implemented.
    fn shift_unimplemented(self) -> bool {
        matches!(self, LegKind::Drc | LegKind::Drs | LegKind::Drr)
    }
}

/// An ordered bit sequence; index 0 is shifted first, regardless of whether
/// that is the value's LSB (`Dr`/`Ir`/...) or MSB (`Drc`/`Drs`).
pub type BitVec = Vec<bool>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegTag {
    /// Set when the row parser's optional fourth field is `"id"`: a hint
    /// that the *next* leg may take the shortcut transition of
    /// [`TapWalker::apply_shortcut`].
    ShortcutHint,
}

#[derive(Debug, Clone)]
pub struct Leg {
    pub kind: LegKind,
    pub bits: BitVec,
    pub tag: Option<LegTag>,
}

impl Leg {
    pub fn new(kind: LegKind, bits: BitVec, tag: Option<LegTag>) -> Self {
        Self { kind, bits, tag }
    }

    pub fn bare(kind: LegKind) -> Self {
        Self {
            kind,
            bits: Vec::new(),
            tag: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapState {
    TestLogicReset,
    RunTestIdle,
    SelectScan,
    Capture,
    Shift,
    Exit1,
    Pause,
    Exit2,
    Update,
}

/// Bit-accumulator and scan bookkeeping for [`TapWalker`].
pub struct WalkerState {
    pub current_state: TapState,
    pub pending_legs: VecDeque<Leg>,
    pub active_leg: Option<Leg>,
    tdo_accumulator: Vec<bool>,
    readout_flag: bool,
    do_pause: bool,
    pub results: Vec<u64>,
    pub last_ir_value: Option<u64>,
    pub last_readdata: Option<u64>,
    pub tms_reset_num: u32,
}

impl Default for WalkerState {
    fn default() -> Self {
        Self {
            current_state: TapState::RunTestIdle,
            pending_legs: VecDeque::new(),
            active_leg: None,
            tdo_accumulator: Vec::new(),
            readout_flag: false,
            do_pause: false,
            results: Vec::new(),
            last_ir_value: None,
            last_readdata: None,
            tms_reset_num: 7,
        }
    }
}

fn bits_to_int(bits: &[bool]) -> u64 {
    bits.iter()
        .enumerate()
        .fold(0u64, |acc, (i, &b)| acc | ((b as u64) << i))
}

/// Drives [`WalkerState`] through [`TapState`] transitions over a
/// [`PinDriver`], one [`Leg`] at a time.
pub struct TapWalker<P> {
    pub pins: P,
    pub state: WalkerState,
}

impl<P: PinDriver> TapWalker<P> {
    pub fn new(pins: P) -> Self {
        Self {
            pins,
            state: WalkerState::default(),
        }
    }

    pub fn push_leg(&mut self, leg: Leg) {
        self.state.pending_legs.push_back(leg);
    }

    pub fn push_legs(&mut self, legs: impl IntoIterator<Item = Leg>) {
        self.state.pending_legs.extend(legs);
    }

    /// Pop a result in FIFO order (oldest first).
    pub fn pop_result(&mut self) -> Option<u64> {
        if self.state.results.is_empty() {
            None
        } else {
            Some(self.state.results.remove(0))
        }
    }

    fn phy(&mut self, tdi: bool, tms: bool) -> Result<bool> {
        phy_sync(&mut self.pins, tdi, tms)
    }

    fn next_leg(&mut self) {
        self.state.active_leg = self.state.pending_legs.pop_front();
    }

    /// Step until both `active_leg` is empty and `current_state` is
    /// `TestLogicReset` or `RunTestIdle`.
    pub fn run_until_idle(&mut self) -> Result<()> {
        loop {
            self.step()?;
            let idle = matches!(
                self.state.current_state,
                TapState::TestLogicReset | TapState::RunTestIdle
            );
            if idle && self.state.active_leg.is_none() && self.state.pending_legs.is_empty() {
                return Ok(());
            }
        }
    }

    /// Perform exactly one state transition.
    #[tracing::instrument(skip_all, fields(state = ?self.state.current_state))]
    pub fn step(&mut self) -> Result<()> {
        match self.state.current_state {
            TapState::TestLogicReset => self.step_test_logic_reset(),
            TapState::RunTestIdle => self.step_run_test_idle(),
            TapState::SelectScan => {
                self.phy(false, false)?;
                self.state.current_state = TapState::Capture;
                Ok(())
            }
            TapState::Capture => {
                self.phy(false, false)?;
                self.state.tdo_accumulator.clear();
                self.state.current_state = TapState::Shift;
                Ok(())
            }
            TapState::Shift => self.step_shift(),
            TapState::Exit1 => {
                if self.state.do_pause {
                    self.phy(false, false)?;
                    self.state.current_state = TapState::Pause;
                    self.state.do_pause = false;
                } else {
                    self.phy(false, true)?;
                    self.state.current_state = TapState::Update;
                }
                Ok(())
            }
            TapState::Pause => {
                self.phy(false, true)?;
                self.state.current_state = TapState::Exit2;
                Ok(())
            }
            TapState::Exit2 => {
                self.phy(false, true)?;
                self.state.current_state = TapState::Update;
                Ok(())
            }
            TapState::Update => self.step_update(),
        }
    }

    fn step_test_logic_reset(&mut self) -> Result<()> {
        if !self.state.pending_legs.is_empty() || self.state.active_leg.is_some() {
            self.phy(false, false)?;
            self.state.current_state = TapState::RunTestIdle;
            self.state.last_ir_value = None;
        }
        Ok(())
    }

    fn step_run_test_idle(&mut self) -> Result<()> {
        let Some(leg) = self.state.active_leg.take() else {
            if let Some(next) = self.state.pending_legs.pop_front() {
                self.state.active_leg = Some(next);
            } else {
                self.phy(false, false)?;
            }
            self.state.current_state = TapState::RunTestIdle;
            return Ok(());
        };

        match leg.kind {
            LegKind::Dr | LegKind::Drc | LegKind::Drr | LegKind::Drs => {
                self.phy(false, true)?;
                self.state.readout_flag = leg.kind.is_readout();
                self.state.active_leg = Some(leg);
                self.state.current_state = TapState::SelectScan;
            }
            LegKind::Ir | LegKind::Ird => {
                self.phy(false, true)?;
                self.phy(false, true)?;
                self.state.do_pause = false;
                self.state.active_leg = Some(leg);
                self.state.current_state = TapState::SelectScan;
            }
            LegKind::Irp => {
                self.phy(false, true)?;
                self.phy(false, true)?;
                self.state.do_pause = true;
                self.state.active_leg = Some(leg);
                self.state.current_state = TapState::SelectScan;
            }
            LegKind::Rs => {
                debug!("TMS reset");
                for _ in 0..self.state.tms_reset_num {
                    self.phy(false, true)?;
                }
                self.state.current_state = TapState::TestLogicReset;
                self.state.last_ir_value = None;
                self.next_leg();
            }
            LegKind::Dl => {
                std::thread::sleep(Duration::from_millis(5));
                self.next_leg();
            }
            LegKind::Id => {
                self.phy(false, false)?;
                self.next_leg();
            }
        }
        Ok(())
    }

    fn step_shift(&mut self) -> Result<()> {
        let leg = self
            .state
            .active_leg
            .as_ref()
            .expect("Shift state always has an active leg");

        if leg.kind.shift_unimplemented() {
            return Err(InvariantError::Unimplemented { kind: leg.kind }.into());
        }

        debug_assert!(
            !leg.kind.msb_first(),
            "msb_first legs are currently only Drc/Drs, both shift_unimplemented"
        );

        let leg = self.state.active_leg.as_mut().unwrap();
        let bit = leg.bits.remove(0);
        let last = leg.bits.is_empty();

        if !last {
            let tdo = self.phy(bit, false)?;
            if self.state.active_leg.as_ref().unwrap().kind.captures_tdo() {
                self.state.tdo_accumulator.push(tdo);
            }
        } else {
            let captures = self.state.active_leg.as_ref().unwrap().kind.captures_tdo();
            let tdo = self.phy(bit, true)?;
            if captures {
                self.state.tdo_accumulator.push(tdo);
            }
            self.state.active_leg = None;
            self.state.current_state = TapState::Exit1;
        }
        Ok(())
    }

    fn step_update(&mut self) -> Result<()> {
        let result = bits_to_int(&self.state.tdo_accumulator);
        self.state.results.push(result);
        if self.state.readout_flag {
            self.state.last_readdata = Some(result);
            self.state.readout_flag = false;
        }
        self.state.tdo_accumulator.clear();

        self.apply_shortcut()
    }

    /// After Update, either dwell in RunTestIdle or, if the next leg is a
    /// DR/IRP/IRD, skip straight into SelectScan without the idle dwell.
    fn apply_shortcut(&mut self) -> Result<()> {
        let Some(head_kind) = self.state.pending_legs.front().map(|l| l.kind) else {
            self.phy(false, false)?;
            self.state.current_state = TapState::RunTestIdle;
            return Ok(());
        };

        if matches!(head_kind, LegKind::Dr | LegKind::Irp | LegKind::Ird) {
            if matches!(head_kind, LegKind::Irp | LegKind::Ird) {
                self.phy(false, true)?;
                debug!("IR bypassing wait state");
            }
            if head_kind == LegKind::Irp {
                self.state.do_pause = true;
            }

            self.next_leg();
            self.phy(false, true)?;
            self.state.current_state = TapState::SelectScan;
        } else {
            self.phy(false, false)?;
            self.state.current_state = TapState::RunTestIdle;
        }
        Ok(())
    }
}
