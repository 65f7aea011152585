use std::collections::BTreeMap;

use nix::libc;
use seccompiler::{
    BpfProgram, SeccompAction, SeccompCmpArgLen, SeccompCmpOp, SeccompCondition, SeccompFilter,
    SeccompRule, TargetArch,
};

use crate::syscall::set_no_new_privs;
use crate::Error;

/// Installs the allow-by-default filter. Must be the last setup step: the
/// denied calls include the ones used to build the container itself.
pub(crate) fn install_policy() -> Result<(), Error> {
    set_no_new_privs().map_err(|v| format!("Cannot set no_new_privs: {v}"))?;
    let program = build_policy()?;
    seccompiler::apply_filter(&program).map_err(|v| format!("Cannot load seccomp filter: {v}"))?;
    log::debug!("Loaded seccomp filter");
    Ok(())
}

fn build_policy() -> Result<BpfProgram, Error> {
    let filter = SeccompFilter::new(
        deny_rules()?,
        SeccompAction::Allow,
        SeccompAction::Errno(libc::EPERM as u32),
        TargetArch::x86_64,
    )
    .map_err(|v| format!("Cannot build seccomp filter: {v}"))?;
    Ok(filter
        .try_into()
        .map_err(|v| format!("Cannot compile seccomp filter: {v}"))?)
}

fn deny_rules() -> Result<BTreeMap<i64, Vec<SeccompRule>>, Error> {
    let mut rules = BTreeMap::new();
    // Kernel keyrings, memory policy and perf are denied outright.
    for syscall in [
        libc::SYS_keyctl,
        libc::SYS_add_key,
        libc::SYS_request_key,
        libc::SYS_mbind,
        libc::SYS_migrate_pages,
        libc::SYS_move_pages,
        libc::SYS_set_mempolicy,
        libc::SYS_perf_event_open,
    ] {
        rules.insert(syscall, Vec::new());
    }
    // No new setuid/setgid file modes.
    rules.insert(libc::SYS_chmod, mode_rules(1)?);
    rules.insert(libc::SYS_fchmod, mode_rules(1)?);
    rules.insert(libc::SYS_fchmodat, mode_rules(2)?);
    // No nested user namespaces, no terminal input injection.
    rules.insert(
        libc::SYS_unshare,
        vec![masked_rule(0, libc::CLONE_NEWUSER as u64)?],
    );
    rules.insert(
        libc::SYS_clone,
        vec![masked_rule(0, libc::CLONE_NEWUSER as u64)?],
    );
    rules.insert(libc::SYS_ioctl, vec![masked_rule(1, libc::TIOCSTI as u64)?]);
    Ok(rules)
}

fn mode_rules(arg: u8) -> Result<Vec<SeccompRule>, Error> {
    Ok(vec![
        masked_rule(arg, libc::S_ISUID as u64)?,
        masked_rule(arg, libc::S_ISGID as u64)?,
    ])
}

/// Denies the call when all `bits` of the argument are set.
fn masked_rule(arg: u8, bits: u64) -> Result<SeccompRule, Error> {
    Ok(SeccompRule::new(vec![SeccompCondition::new(
        arg,
        SeccompCmpArgLen::Qword,
        SeccompCmpOp::MaskedEq(bits),
        bits,
    )?])?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_compiles_to_bpf() {
        let program = build_policy().unwrap();
        assert!(!program.is_empty());
    }

    #[test]
    fn deny_lists_cover_the_contract() {
        let rules = deny_rules().unwrap();
        assert_eq!(rules.len(), 14);
        assert!(rules[&libc::SYS_keyctl].is_empty());
        assert!(rules[&libc::SYS_perf_event_open].is_empty());
        assert_eq!(rules[&libc::SYS_chmod].len(), 2);
        assert_eq!(rules[&libc::SYS_fchmod].len(), 2);
        assert_eq!(rules[&libc::SYS_fchmodat].len(), 2);
        assert_eq!(rules[&libc::SYS_unshare].len(), 1);
        assert_eq!(rules[&libc::SYS_clone].len(), 1);
        assert_eq!(rules[&libc::SYS_ioctl].len(), 1);
    }
}
