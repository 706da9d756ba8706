//! Real-time process setup for the tick loop (Linux SCHED_FIFO / affinity /
//! mlockall; memory locking only elsewhere on Unix).

use std::sync::OnceLock;

use crate::cli::RtLock;

static RT_ONCE: OnceLock<()> = OnceLock::new();

#[cfg(unix)]
fn lock_memory(lock: RtLock) -> std::io::Result<()> {
    let flags = match lock {
        RtLock::None => return Ok(()),
        RtLock::Current => libc::MCL_CURRENT,
        RtLock::All => libc::MCL_CURRENT | libc::MCL_FUTURE,
    };
    // SAFETY: mlockall takes only flags and touches no caller memory.
    let rc = unsafe { libc::mlockall(flags) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(target_os = "linux")]
fn set_fifo(prio: Option<i32>) -> std::io::Result<i32> {
    // SAFETY: plain syscalls on the calling process with a stack-local param.
    unsafe {
        let min = libc::sched_get_priority_min(libc::SCHED_FIFO);
        let max = libc::sched_get_priority_max(libc::SCHED_FIFO);
        let prio = prio.unwrap_or(max).clamp(min, max);
        let param = libc::sched_param {
            sched_priority: prio,
        };
        if libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(prio)
    }
}

#[cfg(target_os = "linux")]
fn pin_cpu(cpu: usize) -> std::io::Result<()> {
    let bits = std::mem::size_of::<libc::cpu_set_t>() * 8;
    if cpu >= bits {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("cpu {cpu} exceeds cpu_set_t capacity {bits}"),
        ));
    }
    // SAFETY: cpu_set_t is plain data; CPU_SET is bounds-checked above.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Apply real-time settings once per process. Failures are logged, never fatal.
#[cfg_attr(not(target_os = "linux"), allow(unused_variables))]
pub fn setup_rt_once(rt: bool, prio: Option<i32>, lock: RtLock, cpu: Option<usize>) {
    if !rt || RT_ONCE.set(()).is_err() {
        return;
    }

    #[cfg(target_os = "linux")]
    {
        match set_fifo(prio) {
            Ok(p) => tracing::info!(prio = p, "SCHED_FIFO enabled"),
            Err(e) => tracing::warn!(error = %e, "SCHED_FIFO unavailable; continuing"),
        }
        let cpu = cpu.unwrap_or(0);
        match pin_cpu(cpu) {
            Ok(()) => tracing::info!(cpu, "pinned to cpu"),
            Err(e) => tracing::warn!(cpu, error = %e, "cpu affinity left unchanged"),
        }
    }

    #[cfg(unix)]
    match lock_memory(lock) {
        Ok(()) => tracing::info!(mode = ?lock, "memory locked"),
        Err(e) => tracing::warn!(
            mode = ?lock,
            error = %e,
            "mlockall failed; raise the memlock ulimit or run with --rt-lock none"
        ),
    }

    #[cfg(not(unix))]
    tracing::warn!("real-time mode is not supported on this OS");
}
