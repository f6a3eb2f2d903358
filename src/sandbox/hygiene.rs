/// Child-side process setup: environment, rlimits and isolation
///
/// Everything the pre_exec hook touches is prepared up front so the hook
/// itself only issues syscalls between fork and exec.
use crate::config::types::{GradeError, Result};
use crate::judge::ExecutionProfile;
use crate::sandbox::workspace::{io_error, ScratchOwner};
use nix::sched::{unshare, CloneFlags};
use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

pub const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Deterministic environment; nothing is inherited from the host.
pub fn sandbox_environment(workdir: &Path, extra: &[(String, String)]) -> Vec<(String, String)> {
    let workdir = workdir.to_string_lossy().to_string();
    let mut env = vec![
        ("PATH".to_string(), SANDBOX_PATH.to_string()),
        ("HOME".to_string(), workdir.clone()),
        ("TMPDIR".to_string(), workdir),
        ("LANG".to_string(), "C.UTF-8".to_string()),
        ("LC_ALL".to_string(), "C.UTF-8".to_string()),
    ];
    for (key, value) in extra {
        env.retain(|(existing, _)| existing != key);
        env.push((key.clone(), value.clone()));
    }
    env
}

#[derive(Debug, Clone, Copy)]
struct RlimitSpec {
    name: &'static str,
    resource: libc::__rlimit_resource_t,
    value: u64,
}

/// Strict-mode inputs for one launch
#[derive(Debug, Clone, Copy)]
pub struct Confinement<'a> {
    /// Host paths masked with an empty tmpfs
    pub hidden_paths: &'a [PathBuf],
    /// Directory holding every slot and build; masked except for `workdir`
    pub scratch_root: &'a Path,
    pub workdir: &'a Path,
    /// Identity owning this slot
    pub identity: ScratchOwner,
}

/// Mount steps that leave only the launch's own slot under the scratch root
#[derive(Debug)]
struct ScratchMask {
    scratch_root: CString,
    /// Directories recreated inside the masking tmpfs, outermost first
    stubs: Vec<CString>,
    workdir: CString,
    /// `/proc/self/fd/N` of the held handle; the slot stays reachable after masking
    bind_source: CString,
    /// Held open until exec; close-on-exec drops it from the payload
    _handle: File,
}

/// Syscall plan executed in the forked child before exec.
#[derive(Debug)]
pub struct PreExecPlan {
    rlimits: Vec<RlimitSpec>,
    isolate: bool,
    root: CString,
    tmpfs: CString,
    tmpfs_data: CString,
    hidden: Vec<CString>,
    mask: Option<ScratchMask>,
    drop_to: Option<ScratchOwner>,
}

fn c_path(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| GradeError::Configuration(format!("path contains NUL: {}", path.display())))
}

fn c_static(text: &str) -> Result<CString> {
    CString::new(text).map_err(|_| GradeError::Configuration(format!("invalid C string: {}", text)))
}

impl ScratchMask {
    fn new(scratch_root: &Path, workdir: &Path) -> Result<Self> {
        let relative = workdir.strip_prefix(scratch_root).map_err(|_| {
            GradeError::Configuration(format!(
                "workdir {} is outside scratch root {}",
                workdir.display(),
                scratch_root.display()
            ))
        })?;
        let mut stubs = Vec::new();
        let mut current = scratch_root.to_path_buf();
        for component in relative.components() {
            current.push(component);
            stubs.push(c_path(&current)?);
        }
        if stubs.is_empty() {
            return Err(GradeError::Configuration(
                "workdir must be below the scratch root".to_string(),
            ));
        }

        let handle = File::open(workdir).map_err(|e| io_error("open", workdir, e))?;
        let bind_source = c_static(&format!("/proc/self/fd/{}", handle.as_raw_fd()))?;
        Ok(Self {
            scratch_root: c_path(scratch_root)?,
            stubs,
            workdir: c_path(workdir)?,
            bind_source,
            _handle: handle,
        })
    }
}

impl PreExecPlan {
    /// Build the plan for one launch.
    ///
    /// A confinement adds namespaces, hidden host paths, the scratch mask,
    /// the process cap and the drop to the slot identity. Hidden paths that
    /// contain the scratch directory are skipped so the payload can still
    /// reach it.
    pub fn new(profile: &ExecutionProfile, confinement: Option<Confinement<'_>>) -> Result<Self> {
        let mut rlimits = vec![
            RlimitSpec {
                name: "RLIMIT_CORE",
                resource: libc::RLIMIT_CORE,
                value: 0,
            },
            RlimitSpec {
                name: "RLIMIT_FSIZE",
                resource: libc::RLIMIT_FSIZE,
                value: profile.file_size_limit,
            },
            RlimitSpec {
                name: "RLIMIT_NOFILE",
                resource: libc::RLIMIT_NOFILE,
                value: profile.fd_limit,
            },
            RlimitSpec {
                name: "RLIMIT_CPU",
                resource: libc::RLIMIT_CPU,
                value: profile.cpu_limit_secs(),
            },
        ];
        if let Some(address_space) = profile.address_space_limit {
            rlimits.push(RlimitSpec {
                name: "RLIMIT_AS",
                resource: libc::RLIMIT_AS,
                value: address_space,
            });
        }
        if confinement.is_some() {
            rlimits.push(RlimitSpec {
                name: "RLIMIT_NPROC",
                resource: libc::RLIMIT_NPROC,
                value: u64::from(profile.process_limit),
            });
        }

        let mut hidden = Vec::new();
        let mut mask = None;
        if let Some(confinement) = &confinement {
            for path in confinement.hidden_paths {
                if confinement.workdir.starts_with(path) || !path.is_dir() {
                    continue;
                }
                hidden.push(c_path(path)?);
            }
            mask = Some(ScratchMask::new(
                confinement.scratch_root,
                confinement.workdir,
            )?);
        }

        Ok(Self {
            rlimits,
            isolate: confinement.is_some(),
            root: c_static("/")?,
            tmpfs: c_static("tmpfs")?,
            tmpfs_data: c_static("size=1m,mode=0755")?,
            hidden,
            mask,
            drop_to: confinement.map(|c| c.identity),
        })
    }

    /// Runs in the child between fork and exec; async-signal-safe calls only.
    pub fn apply(&self) -> io::Result<()> {
        if unsafe { libc::setsid() } < 0 {
            return Err(io::Error::last_os_error());
        }

        if self.isolate {
            unshare(
                CloneFlags::CLONE_NEWNS
                    | CloneFlags::CLONE_NEWNET
                    | CloneFlags::CLONE_NEWIPC
                    | CloneFlags::CLONE_NEWUTS,
            )
            .map_err(io::Error::from)?;

            let rc = unsafe {
                libc::mount(
                    std::ptr::null(),
                    self.root.as_ptr(),
                    std::ptr::null(),
                    libc::MS_REC | libc::MS_PRIVATE,
                    std::ptr::null(),
                )
            };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }

            for target in &self.hidden {
                let rc = unsafe {
                    libc::mount(
                        self.tmpfs.as_ptr(),
                        target.as_ptr(),
                        self.tmpfs.as_ptr(),
                        libc::MS_NOSUID | libc::MS_NODEV | libc::MS_NOEXEC,
                        self.tmpfs_data.as_ptr() as *const libc::c_void,
                    )
                };
                if rc != 0 {
                    return Err(io::Error::last_os_error());
                }
            }

            if let Some(mask) = &self.mask {
                self.mask_scratch(mask)?;
            }
        }

        for spec in &self.rlimits {
            apply_rlimit_value(spec.resource, spec.value)?;
        }

        unsafe {
            libc::umask(0o022);
        }

        if let Some(owner) = self.drop_to {
            unsafe {
                if libc::setgroups(0, std::ptr::null()) != 0 {
                    return Err(io::Error::last_os_error());
                }
                if libc::setgid(owner.gid) != 0 {
                    return Err(io::Error::last_os_error());
                }
                if libc::setuid(owner.uid) != 0 {
                    return Err(io::Error::last_os_error());
                }
            }
        }

        Ok(())
    }

    /// Cover the scratch root with an empty tmpfs, then bind the slot back
    /// at its own path and re-enter it.
    fn mask_scratch(&self, mask: &ScratchMask) -> io::Result<()> {
        let rc = unsafe {
            libc::mount(
                self.tmpfs.as_ptr(),
                mask.scratch_root.as_ptr(),
                self.tmpfs.as_ptr(),
                libc::MS_NOSUID | libc::MS_NODEV | libc::MS_NOEXEC,
                self.tmpfs_data.as_ptr() as *const libc::c_void,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }

        for stub in &mask.stubs {
            if unsafe { libc::mkdir(stub.as_ptr(), 0o755) } != 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::EEXIST) {
                    return Err(err);
                }
            }
        }

        let rc = unsafe {
            libc::mount(
                mask.bind_source.as_ptr(),
                mask.workdir.as_ptr(),
                std::ptr::null(),
                libc::MS_BIND,
                std::ptr::null(),
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }

        // The inherited cwd still points into the covered tree.
        if unsafe { libc::chdir(mask.workdir.as_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn describe_rlimits(&self) -> Vec<String> {
        self.rlimits
            .iter()
            .map(|spec| format!("{}={}", spec.name, spec.value))
            .collect()
    }
}

fn apply_rlimit_value(resource: libc::__rlimit_resource_t, value: u64) -> io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: value as libc::rlim_t,
        rlim_max: value as libc::rlim_t,
    };
    if unsafe { libc::setrlimit(resource, &limit) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}
