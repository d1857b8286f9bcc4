//! Seccomp profile for the container backend
//!
//! Allowlist profile: everything not named returns ENOSYS-style errno. The
//! allowlist covers the syscalls interpreters and toolchains need; the
//! namespace, module, and tracing syscalls stay on the default-deny path,
//! with a few denied explicitly so a future allowlist edit cannot reopen
//! them by accident.

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct SeccompProfile {
    #[serde(rename = "defaultAction")]
    default_action: &'static str,
    architectures: Vec<&'static str>,
    syscalls: Vec<SyscallRule>,
}

#[derive(Debug, Serialize)]
struct SyscallRule {
    names: Vec<&'static str>,
    action: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    args: Vec<SyscallArg>,
}

#[derive(Debug, Serialize)]
struct SyscallArg {
    index: u32,
    value: u64,
    op: &'static str,
}

/// Syscalls interpreters, JITs-off runtimes, and compilers are observed to
/// need. Grouped roughly by concern.
const ALLOWED: &[&str] = &[
    // file and fd basics
    "read", "write", "open", "openat", "close", "stat", "fstat", "lstat", "newfstatat",
    "statx", "lseek", "access", "faccessat", "faccessat2", "dup", "dup2", "dup3",
    "pipe", "pipe2", "fcntl", "flock", "fsync", "fdatasync", "truncate", "ftruncate",
    "getdents", "getdents64", "getcwd", "chdir", "fchdir", "rename", "renameat",
    "renameat2", "mkdir", "mkdirat", "rmdir", "creat", "link", "linkat", "unlink",
    "unlinkat", "symlink", "symlinkat", "readlink", "readlinkat", "chmod", "fchmod",
    "fchmodat", "chown", "fchown", "fchownat", "lchown", "umask", "utime", "utimes",
    "utimensat", "futimesat", "fallocate", "copy_file_range", "sync", "syncfs",
    "sync_file_range", "statfs", "fstatfs", "pread64", "pwrite64", "preadv",
    "pwritev", "preadv2", "pwritev2", "readv", "writev", "splice", "tee", "vmsplice",
    "sendfile",
    // memory
    "mmap", "mprotect", "munmap", "brk", "mremap", "msync", "mincore", "madvise",
    "mlock", "mlock2", "munlock", "mlockall", "munlockall", "membarrier",
    "memfd_create", "remap_file_pages",
    // signals
    "rt_sigaction", "rt_sigprocmask", "rt_sigreturn", "rt_sigpending",
    "rt_sigtimedwait", "rt_sigqueueinfo", "rt_tgsigqueueinfo", "sigaltstack",
    "kill", "tkill", "tgkill", "pause", "restart_syscall", "signalfd", "signalfd4",
    // processes and threads
    "clone", "clone3", "fork", "vfork", "execve", "execveat", "exit", "exit_group",
    "wait4", "waitid", "gettid", "getpid", "getppid", "set_tid_address",
    "set_robust_list", "get_robust_list", "futex", "futex_waitv", "setpgid",
    "getpgid", "getpgrp", "setsid", "getsid", "prctl", "arch_prctl",
    "set_thread_area", "get_thread_area",
    // ids and capabilities
    "getuid", "geteuid", "getgid", "getegid", "setuid", "setgid", "setreuid",
    "setregid", "setresuid", "getresuid", "setresgid", "getresgid", "setfsuid",
    "setfsgid", "getgroups", "setgroups", "capget", "capset",
    // scheduling
    "sched_yield", "sched_getaffinity", "sched_setaffinity", "sched_getparam",
    "sched_setparam", "sched_getscheduler", "sched_setscheduler",
    "sched_get_priority_max", "sched_get_priority_min", "sched_rr_get_interval",
    "sched_getattr", "sched_setattr", "getpriority", "setpriority",
    // timers and clocks
    "nanosleep", "clock_nanosleep", "clock_gettime", "clock_getres",
    "gettimeofday", "time", "times", "getitimer", "setitimer", "alarm",
    "timer_create", "timer_settime", "timer_gettime", "timer_getoverrun",
    "timer_delete", "timerfd_create", "timerfd_settime", "timerfd_gettime",
    // polling and events
    "poll", "ppoll", "select", "pselect6", "epoll_create", "epoll_create1",
    "epoll_ctl", "epoll_wait", "epoll_pwait", "epoll_pwait2", "eventfd",
    "eventfd2", "io_setup", "io_destroy", "io_getevents", "io_submit",
    "io_cancel", "io_uring_setup", "io_uring_enter", "io_uring_register",
    // sockets (the network namespace is gone, loopback-style IPC remains)
    "socket", "socketpair", "connect", "bind", "listen", "accept", "accept4",
    "sendto", "recvfrom", "sendmsg", "recvmsg", "sendmmsg", "recvmmsg",
    "shutdown", "getsockname", "getpeername", "setsockopt", "getsockopt",
    // misc process info
    "uname", "sysinfo", "getrlimit", "setrlimit", "prlimit64", "getrusage",
    "getrandom", "getcpu", "ioctl", "personality", "seccomp", "rseq",
    // xattrs (toolchains stat these)
    "setxattr", "lsetxattr", "fsetxattr", "getxattr", "lgetxattr", "fgetxattr",
    "listxattr", "llistxattr", "flistxattr", "removexattr", "lremovexattr",
    "fremovexattr",
    // inotify (file watchers in runtimes)
    "inotify_init", "inotify_init1", "inotify_add_watch", "inotify_rm_watch",
];

/// Denied even though the default action already covers them.
const DENIED: &[&str] = &[
    "ptrace", "mount", "umount2", "reboot", "swapon", "swapoff", "kexec_load",
    "kexec_file_load", "init_module", "finit_module", "delete_module", "acct",
    "setns", "unshare", "pivot_root", "chroot", "bpf", "userfaultfd",
    "open_by_handle_at", "name_to_handle_at", "perf_event_open", "keyctl",
    "add_key", "request_key",
];

impl SeccompProfile {
    pub fn restrictive() -> Self {
        Self {
            default_action: "SCMP_ACT_ERRNO",
            architectures: vec![
                "SCMP_ARCH_X86_64",
                "SCMP_ARCH_X86",
                "SCMP_ARCH_AARCH64",
                "SCMP_ARCH_ARM",
            ],
            syscalls: vec![
                SyscallRule {
                    names: ALLOWED.to_vec(),
                    action: "SCMP_ACT_ALLOW",
                    args: Vec::new(),
                },
                SyscallRule {
                    names: DENIED.to_vec(),
                    action: "SCMP_ACT_ERRNO",
                    args: Vec::new(),
                },
            ],
        }
    }

    /// Render as the JSON form Docker accepts in `--security-opt seccomp=`.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_serializes_with_docker_field_names() {
        let json = SeccompProfile::restrictive().to_json().unwrap();
        assert!(json.contains("\"defaultAction\":\"SCMP_ACT_ERRNO\""));
        assert!(json.contains("SCMP_ARCH_X86_64"));
        assert!(json.contains("execve"));
    }

    #[test]
    fn dangerous_syscalls_are_not_allowed() {
        for name in DENIED {
            assert!(!ALLOWED.contains(name), "{name} is in both lists");
        }
    }
}
