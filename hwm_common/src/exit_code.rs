//! Process exit codes of a hardware module.
//!
//! The supervising process manager uses them to decide whether a restart
//! makes sense.

use std::fmt;

/// Exit code reported when the hardware module process terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum HardwareModuleExitCode {
    /// Shut down on request.
    NormalShutdown = 0,
    /// The driver failed during `init`.
    FatalFaultDuringInit = 111,
    /// The module ended up `FatallyFaulted` while running.
    FatalFaultDuringExec = 112,
}

impl HardwareModuleExitCode {
    /// Numeric value handed to `std::process::exit`.
    #[inline]
    pub const fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for HardwareModuleExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NormalShutdown => "NormalShutdown",
            Self::FatalFaultDuringInit => "FatalFaultDuringInit",
            Self::FatalFaultDuringExec => "FatalFaultDuringExec",
        };
        write!(f, "{name} ({})", self.code())
    }
}
