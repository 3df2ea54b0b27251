/// Identity and interrupt control of the executing processor core.
///
/// The kernel's per-core data structures are indexed by [`Cpu::id`]. The id is
/// only stable while interrupts are masked on the current core: with
/// interrupts enabled a timer tick may reschedule the task onto another core.
/// Read it inside an [`IrqGuard`].
pub trait Cpu: Sync {
    /// Index of the executing core, `0..NCPU`.
    fn id(&self) -> usize;

    /// Whether interrupt delivery is enabled on the executing core.
    fn interrupts_enabled(&self) -> bool;

    /// Masks interrupt delivery on the executing core.
    fn disable_interrupts(&self);

    /// Unmasks interrupt delivery on the executing core.
    fn enable_interrupts(&self);
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// `IrqGuard::new()` snapshots whether interrupts are enabled. If they were,
/// it masks them. On drop, it unmasks them **only** if they were previously
/// enabled, preserving the original state. Guards therefore nest: the
/// outermost guard decides whether interrupts come back on.
///
/// # Examples
///
/// ```no_run
/// use kernel_sync::{IrqGuard, X86Cpu};
///
/// let cpu = X86Cpu;
/// {
///     let g = IrqGuard::new(&cpu); // interrupts disabled here if previously enabled
///     let _core = g.cpu_id();      // stable for the guard's lifetime
/// }
/// // interrupt state restored here
/// ```
pub struct IrqGuard<'a, C: Cpu + ?Sized> {
    cpu: &'a C,
    /// Whether interrupts were enabled when the guard was created.
    were_enabled: bool,
}

impl<'a, C: Cpu + ?Sized> IrqGuard<'a, C> {
    /// Disables interrupts if they are currently enabled and remembers the state.
    #[inline]
    #[must_use]
    pub fn new(cpu: &'a C) -> Self {
        let enabled = cpu.interrupts_enabled();
        if enabled {
            cpu.disable_interrupts();
        }
        Self {
            cpu,
            were_enabled: enabled,
        }
    }

    /// The executing core, pinned for as long as the guard lives.
    #[inline]
    #[must_use]
    pub fn cpu_id(&self) -> usize {
        self.cpu.id()
    }
}

impl<C: Cpu + ?Sized> Drop for IrqGuard<'_, C> {
    /// Restores interrupts only if they were previously enabled.
    fn drop(&mut self) {
        if self.were_enabled {
            self.cpu.enable_interrupts();
        }
    }
}

/// [`Cpu`] for bare-metal `x86_64` in a privileged context.
///
/// Interrupt control uses `cli/sti` and `pushfq/pop`; the core id is the
/// initial local APIC id reported by CPUID leaf `01h`, which firmware assigns
/// densely from zero on the platforms this kernel targets.
///
/// # Safety & Privilege
///
/// These operations must run in a context where `cli`/`sti` are legal
/// (e.g., kernel or a suitable hypervisor context). Calling from user space
/// or non-privileged modes faults.
#[derive(Debug, Default, Copy, Clone)]
pub struct X86Cpu;

#[cfg(target_arch = "x86_64")]
impl Cpu for X86Cpu {
    #[inline]
    fn id(&self) -> usize {
        #[allow(unused_unsafe)]
        let leaf = unsafe { core::arch::x86_64::__cpuid(0x01) };
        (leaf.ebx >> 24) as usize
    }

    #[inline]
    fn interrupts_enabled(&self) -> bool {
        (rflags() & (1 << 9)) != 0
    }

    #[inline]
    fn disable_interrupts(&self) {
        cli_stop_interrupts();
    }

    #[inline]
    fn enable_interrupts(&self) {
        sti_enable_interrupts();
    }
}

/// Disables hardware interrupts (`cli`).
#[cfg(target_arch = "x86_64")]
#[inline]
pub fn cli_stop_interrupts() {
    unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
}

/// Enables hardware interrupts (`sti`).
#[cfg(target_arch = "x86_64")]
#[inline]
pub fn sti_enable_interrupts() {
    unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
}

/// Returns the current `RFLAGS` value (via `pushfq/pop`).
///
/// Bit 9 (`IF`) indicates whether interrupts are enabled.
#[cfg(target_arch = "x86_64")]
#[inline]
#[must_use]
pub fn rflags() -> u64 {
    let r: u64;
    unsafe { core::arch::asm!("pushfq; pop {}", out(reg) r, options(nostack, preserves_flags)) }
    r
}
