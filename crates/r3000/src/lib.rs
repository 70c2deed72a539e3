//! Architecture definitions for the MIPS R3000A as found in the PS2's I/O processor (IOP).
//!
//! This crate does not implement an instruction pipeline. It provides the address and cycle
//! newtypes used across the emulator, the COP0 registers involved in interrupt delivery and the
//! small amount of CPU state the peripheral core needs to interact with an execution loop.

use bitos::{bitos, integer::u5};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::FromRepr;
use zerocopy::{FromBytes, Immutable, IntoBytes};

/// An address in the IOP's memory address space. This is a thin wrapper around an [`u32`].
#[repr(transparent)]
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Default,
    Hash,
    IntoBytes,
    FromBytes,
    Immutable,
    Serialize,
    Deserialize,
)]
pub struct Address(pub u32);

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "0x{:04X}_{:04X}",
            (self.0 & 0xFFFF_0000) >> 16,
            self.0 & 0xFFFF
        )
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl Address {
    /// Returns the value of this address. Equivalent to `self.0`.
    #[inline(always)]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Whether this address is null.
    #[inline(always)]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Strips the KSEG0/KSEG1 segment bits, leaving a physical address.
    #[inline(always)]
    pub const fn physical(self) -> Self {
        Self(self.0 & 0x1FFF_FFFF)
    }

    /// Aligns this address down to the given alignment.
    pub const fn align_down(self, alignment: u32) -> Self {
        let rem = self.0 % alignment;
        Self(self.0 - rem)
    }
}

impl std::ops::Add<u32> for Address {
    type Output = Self;

    #[inline(always)]
    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0.wrapping_add(rhs))
    }
}

impl std::ops::AddAssign<u32> for Address {
    #[inline(always)]
    fn add_assign(&mut self, rhs: u32) {
        *self = *self + rhs;
    }
}

impl std::ops::Sub<u32> for Address {
    type Output = Self;

    #[inline(always)]
    fn sub(self, rhs: u32) -> Self::Output {
        Self(self.0.wrapping_sub(rhs))
    }
}

impl std::ops::Sub<Address> for Address {
    type Output = i64;

    #[inline(always)]
    fn sub(self, rhs: Address) -> Self::Output {
        self.0 as i64 - rhs.0 as i64
    }
}

impl PartialEq<u32> for Address {
    #[inline(always)]
    fn eq(&self, other: &u32) -> bool {
        self.0 == *other
    }
}

impl From<u32> for Address {
    #[inline(always)]
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Address> for u32 {
    #[inline(always)]
    fn from(value: Address) -> Self {
        value.0
    }
}

/// The IOP clock frequency, 36.864 MHz.
pub const FREQUENCY: u64 = 36_864_000;

/// An amount of cycles of the IOP. This is a thin wrapper around an [`u64`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Default,
    Hash,
    IntoBytes,
    FromBytes,
    Immutable,
    Serialize,
    Deserialize,
)]
pub struct Cycles(pub u64);

impl std::fmt::Display for Cycles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl Cycles {
    /// Cycles per second of the CPU. This is an alias for the [`FREQUENCY`] constant, wrapped in
    /// [`Cycles`].
    pub const PER_SECOND: Self = Self(FREQUENCY);

    /// Returns the value of this amount. Equivalent to `self.0`.
    #[inline(always)]
    pub const fn value(self) -> u64 {
        self.0
    }

    #[inline(always)]
    pub const fn from_secs_f64(secs: f64) -> Self {
        Self((secs * Self::PER_SECOND.0 as f64) as u64)
    }

    #[inline(always)]
    pub const fn from_duration(duration: Duration) -> Self {
        Self::from_secs_f64(duration.as_secs_f64())
    }

    #[inline(always)]
    pub fn to_duration(&self) -> Duration {
        Duration::from_secs_f64(self.0 as f64 / Self::PER_SECOND.0 as f64)
    }
}

impl std::ops::Add<Cycles> for Cycles {
    type Output = Self;

    #[inline(always)]
    fn add(self, rhs: Cycles) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl std::ops::Add<u64> for Cycles {
    type Output = Self;

    #[inline(always)]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl std::ops::AddAssign<Cycles> for Cycles {
    #[inline(always)]
    fn add_assign(&mut self, rhs: Cycles) {
        *self = *self + rhs;
    }
}

impl std::ops::AddAssign<u64> for Cycles {
    #[inline(always)]
    fn add_assign(&mut self, rhs: u64) {
        *self = *self + rhs;
    }
}

impl std::ops::Sub<Cycles> for Cycles {
    type Output = Cycles;

    #[inline(always)]
    fn sub(self, rhs: Cycles) -> Self::Output {
        Self(self.0.checked_sub(rhs.0).expect("cycles sub overflow"))
    }
}

impl std::ops::Sub<u64> for Cycles {
    type Output = Self;

    #[inline(always)]
    fn sub(self, rhs: u64) -> Self::Output {
        Self(self.0 - rhs)
    }
}

impl std::ops::SubAssign<Cycles> for Cycles {
    #[inline(always)]
    fn sub_assign(&mut self, rhs: Cycles) {
        *self = *self - rhs;
    }
}

impl PartialEq<u64> for Cycles {
    #[inline(always)]
    fn eq(&self, other: &u64) -> bool {
        self.0 == *other
    }
}

impl From<u64> for Cycles {
    #[inline(always)]
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// An exception of the R3000A, identified by its COP0 cause code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum Exception {
    Interrupt = 0x00,
    AddressErrorLoad = 0x04,
    AddressErrorStore = 0x05,
    BusErrorInstr = 0x06,
    BusErrorData = 0x07,
    Syscall = 0x08,
    Breakpoint = 0x09,
    ReservedInstruction = 0x0A,
    CoprocessorUnusable = 0x0B,
    Overflow = 0x0C,
}

/// The COP0 status register (SR).
#[bitos(32)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Status {
    /// Current interrupt enable.
    #[bits(0)]
    pub interrupt_enable: bool,
    /// Current kernel/user mode.
    #[bits(1)]
    pub user_mode: bool,
    /// Per-line interrupt mask. Bit 2 corresponds to the hardware interrupt line the INTC is
    /// wired to.
    #[bits(8..16)]
    pub interrupt_mask: u8,
    #[bits(16)]
    pub isolate_cache: bool,
    #[bits(22)]
    pub boot_vectors: bool,
}

/// The COP0 cause register.
#[bitos(32)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Cause {
    /// Cause code of the last exception.
    #[bits(2..7)]
    pub code: u5,
    /// Pending interrupt lines. Bit 2 is driven by the INTC.
    #[bits(8..16)]
    pub interrupt_pending: u8,
    /// Whether the exception happened in a branch delay slot.
    #[bits(31)]
    pub branch_delay: bool,
}

/// The hardware interrupt line of the [`Cause::interrupt_pending`] field driven by the INTC.
pub const INTC_INTERRUPT_LINE: u8 = 2;

/// CPU state relevant to the peripheral core.
///
/// An execution loop owns the register file. All this core needs is the interrupt delivery state
/// and a flag telling the loop to run its branch test.
#[derive(Debug, Clone, Default)]
pub struct Cpu {
    pub pc: Address,
    pub status: Status,
    pub cause: Cause,
    /// Set whenever an exception is raised. The execution loop consumes it.
    pub pending_exception: Option<Exception>,
}

impl Cpu {
    /// Whether interrupts are currently deliverable on the INTC line.
    #[inline(always)]
    pub fn interrupts_enabled(&self) -> bool {
        self.status.interrupt_enable()
            && self.status.interrupt_mask() & (1 << INTC_INTERRUPT_LINE) != 0
    }

    /// Drives the INTC hardware interrupt line.
    #[inline(always)]
    pub fn set_interrupt_line(&mut self, level: bool) {
        let pending = if level {
            self.cause.interrupt_pending() | (1 << INTC_INTERRUPT_LINE)
        } else {
            self.cause.interrupt_pending() & !(1 << INTC_INTERRUPT_LINE)
        };
        self.cause.set_interrupt_pending(pending);
    }

    /// Records an exception for the execution loop to take.
    pub fn raise_exception(&mut self, exception: Exception) {
        self.cause.set_code(u5::new(exception as u8));
        self.pending_exception = Some(exception);
    }
}
