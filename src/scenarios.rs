//! Built-in verification scenarios.
//!
//! Each scenario body takes a [`ProcessContext`] over any [`Kernel`] and the
//! scenario directory, so it can be exercised in-process against a test
//! double. The registered entries run the same bodies on the host kernel in
//! a child and turn the result into an exit code.

use crate::harness::{finish, Procedure, Registry, RegistryBuilder};
use crate::kernel::Kernel;
use crate::rights::{Right, RightsSet};
use crate::sandbox::ProcessContext;
use anyhow::{bail, ensure, Context, Result};
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use std::path::Path;

const TEST_FILE: &str = "capmodetest";
const TEST_FILE2: &str = "capmodetest2";

fn append_create() -> OFlag {
    OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_APPEND
}

fn rw_mode() -> Mode {
    Mode::from_bits_truncate(0o666)
}

/// Ambient opens work before `enter` and fail `NotCapable` after it.
pub fn cap_enter<K: Kernel>(ctx: &mut ProcessContext<K>, dir: &Path) -> Result<()> {
    ctx.open_ambient(dir.join(TEST_FILE), append_create(), rw_mode())
        .context("open before cap_enter")?;

    ctx.enter().context("cap_enter")?;

    match ctx.open_ambient(dir.join(TEST_FILE2), append_create(), rw_mode()) {
        Ok(_) => bail!("ambient open succeeded in capability mode"),
        Err(e) if e.is_not_capable() => Ok(()),
        Err(e) => bail!("ambient open failed wrong: {}", e),
    }
}

/// Directory-relative access survives `enter`; narrowing the directory to
/// {READ, LOOKUP} then stops creation but not reading.
pub fn openat<K: Kernel>(ctx: &mut ProcessContext<K>, dir: &Path) -> Result<()> {
    let base = ctx
        .open_ambient(dir, OFlag::O_RDONLY | OFlag::O_DIRECTORY, Mode::empty())
        .context("open scenario directory")?;

    ctx.enter().context("cap_enter")?;

    ctx.open_relative(&base, "xx", append_create(), rw_mode())
        .context("openat xx")?;
    ctx.open_file_at(&base, "yy", append_create(), rw_mode())
        .context("open_file_at yy")?;

    match ctx.open_ambient(dir.join("xx"), append_create(), rw_mode()) {
        Ok(_) => bail!("ambient open of base/xx succeeded"),
        Err(e) if e.is_not_capable() => {}
        Err(e) => bail!("ambient open failed wrong: {}", e),
    }

    let mut sibling = dir.as_os_str().to_owned();
    sibling.push("2");
    match ctx.create_dir_ambient(&sibling, Mode::from_bits_truncate(0o777)) {
        Ok(()) => bail!("mkdir succeeded in capability mode"),
        // Some kernels report EPERM here instead of ECAPMODE.
        Err(e) if e.is_not_capable() || e.is_permission_denied() => {}
        Err(e) => bail!("mkdir failed wrong: {}", e),
    }

    ctx.limit(&base, &RightsSet::new(&[Right::Read, Right::Lookup]))
        .context("limit base to READ|LOOKUP")?;

    let rights = ctx.rights(&base).context("get base rights")?;
    ensure!(
        rights.is_set(&[Right::Read, Right::Lookup]),
        "unexpected rights: {}",
        rights
    );
    ensure!(
        !rights.is_set(&[Right::Read, Right::Lookup, Right::Write]),
        "unexpected rights (2): {}",
        rights
    );

    match ctx.open_relative(&base, "xx2", append_create(), rw_mode()) {
        Ok(_) => bail!("openat xx2 succeeded without WRITE"),
        Err(e) if e.is_not_capable() => {}
        Err(e) => bail!("openat xx2 failed wrong: {}", e),
    }

    ctx.open_relative(&base, "xx", OFlag::O_RDONLY, Mode::empty())
        .context("openat xx for reading")?;
    Ok(())
}

/// Insists on ambient authority after `enter`; a correct sandbox makes this
/// fail.
pub fn cap_enter_ambient_open<K: Kernel>(ctx: &mut ProcessContext<K>, dir: &Path) -> Result<()> {
    ctx.enter().context("cap_enter")?;
    ctx.open_ambient(dir.join(TEST_FILE), append_create(), rw_mode())
        .context("ambient open after cap_enter")?;
    Ok(())
}

/// A limited descriptor can be narrowed further but never widened.
pub fn rights_narrowing<K: Kernel>(ctx: &mut ProcessContext<K>, dir: &Path) -> Result<()> {
    let base = ctx
        .open_ambient(dir, OFlag::O_RDONLY | OFlag::O_DIRECTORY, Mode::empty())
        .context("open scenario directory")?;

    ctx.limit(&base, &RightsSet::new(&[Right::Read, Right::Lookup]))
        .context("limit to READ|LOOKUP")?;

    match ctx.limit(&base, &RightsSet::new(&[Right::Read, Right::Lookup, Right::Write])) {
        Ok(()) => bail!("widening to READ|LOOKUP|WRITE succeeded"),
        Err(e) if e.is_permission_denied() => {}
        Err(e) => bail!("widening failed wrong: {}", e),
    }

    ctx.limit(&base, &RightsSet::new(&[Right::Read]))
        .context("narrow to READ")?;
    let rights = ctx.rights(&base).context("get rights")?;
    ensure!(
        rights == RightsSet::new(&[Right::Read]),
        "expected CAP_READ, found {}",
        rights
    );
    Ok(())
}

fn host(body: fn(&mut ProcessContext, &Path) -> Result<()>, arg: &str) {
    finish(body(&mut ProcessContext::host(), Path::new(arg)))
}

fn cap_enter_entry(arg: &str) {
    host(cap_enter, arg)
}

fn openat_entry(arg: &str) {
    host(openat, arg)
}

fn cap_enter_ambient_open_entry(arg: &str) {
    host(cap_enter_ambient_open, arg)
}

fn rights_narrowing_entry(arg: &str) {
    host(rights_narrowing, arg)
}

/// Add the built-in scenarios to `builder`.
pub fn register(builder: RegistryBuilder) -> RegistryBuilder {
    builder
        .register(
            Procedure::new("cap_enter", cap_enter_entry)
                .describe("ambient open is refused after cap_enter")
                .in_temp_dir(),
        )
        .register(
            Procedure::new("openat", openat_entry)
                .describe("openat within a limited directory after cap_enter")
                .in_temp_dir(),
        )
        .register(
            Procedure::new("cap_enter_ambient_open", cap_enter_ambient_open_entry)
                .describe("insists on ambient open after cap_enter; must fail")
                .expect_failure()
                .in_temp_dir(),
        )
        .register(
            Procedure::new("rights_narrowing", rights_narrowing_entry)
                .describe("descriptor rights narrow but never widen")
                .in_temp_dir(),
        )
}

/// Registry holding only the built-in scenarios.
pub fn builtin() -> crate::config::types::Result<Registry> {
    register(Registry::builder()).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::CleanupPolicy;
    use crate::kernel::fake::FakeKernel;
    use crate::safety::workspace::ScenarioDir;

    fn in_scenario_dir(body: impl FnOnce(&Path)) {
        let dir = ScenarioDir::create(&std::env::temp_dir()).unwrap();
        body(dir.path());
        dir.remove(CleanupPolicy::Strict).unwrap();
    }

    fn fake() -> ProcessContext<FakeKernel> {
        ProcessContext::with_kernel(FakeKernel::new())
    }

    #[test]
    fn builtin_registry_has_expected_scenarios() {
        let registry = builtin().unwrap();
        assert_eq!(
            registry.names(),
            vec!["cap_enter", "openat", "cap_enter_ambient_open", "rights_narrowing"]
        );
        assert!(!registry.get("cap_enter_ambient_open").unwrap().expect_success());
    }

    #[test]
    fn cap_enter_holds_on_fake_kernel() {
        in_scenario_dir(|dir| {
            cap_enter(&mut fake(), dir).unwrap();
            assert!(dir.join(TEST_FILE).exists());
            assert!(!dir.join(TEST_FILE2).exists());
        });
    }

    #[test]
    fn openat_holds_on_fake_kernel() {
        in_scenario_dir(|dir| {
            openat(&mut fake(), dir).unwrap();
            assert!(dir.join("xx").exists());
            assert!(dir.join("yy").exists());
            assert!(!dir.join("xx2").exists());
        });
    }

    #[test]
    fn ambient_open_after_enter_fails() {
        in_scenario_dir(|dir| {
            let err = cap_enter_ambient_open(&mut fake(), dir).unwrap_err();
            assert!(format!("{:#}", err).contains("ambient open after cap_enter"));
        });
    }

    #[test]
    fn rights_narrowing_holds_on_fake_kernel() {
        in_scenario_dir(|dir| rights_narrowing(&mut fake(), dir).unwrap());
    }

    #[test]
    fn scenarios_fail_when_the_kernel_cannot_enter() {
        // A failed cap_enter must end the scenario in failure.
        struct NoEnter(FakeKernel);
        impl Kernel for NoEnter {
            fn cap_enter(&self) -> std::io::Result<()> {
                Err(std::io::Error::from_raw_os_error(libc::ENOSYS))
            }
            fn cap_getmode(&self) -> std::io::Result<bool> {
                self.0.cap_getmode()
            }
            fn cap_rights_limit(
                &self,
                fd: std::os::fd::RawFd,
                rights: &crate::rights::codec::PackedRights,
            ) -> std::io::Result<()> {
                self.0.cap_rights_limit(fd, rights)
            }
            fn cap_rights_get(
                &self,
                fd: std::os::fd::RawFd,
            ) -> std::io::Result<crate::rights::codec::PackedRights> {
                self.0.cap_rights_get(fd)
            }
            fn openat(
                &self,
                dirfd: std::os::fd::RawFd,
                path: &std::ffi::CStr,
                flags: OFlag,
                mode: Mode,
            ) -> std::io::Result<std::os::fd::OwnedFd> {
                self.0.openat(dirfd, path, flags, mode)
            }
            fn open(
                &self,
                path: &std::ffi::CStr,
                flags: OFlag,
                mode: Mode,
            ) -> std::io::Result<std::os::fd::OwnedFd> {
                self.0.open(path, flags, mode)
            }
            fn mkdir(&self, path: &std::ffi::CStr, mode: Mode) -> std::io::Result<()> {
                self.0.mkdir(path, mode)
            }
        }

        in_scenario_dir(|dir| {
            let mut ctx = ProcessContext::with_kernel(NoEnter(FakeKernel::new()));
            let err = cap_enter(&mut ctx, dir).unwrap_err();
            assert!(format!("{:#}", err).contains("cap_enter"));
        });
    }
}
