//! Configuration channel
//!
//! One command per write:
//!
//! ```text
//! rmid_alloc_policy <int>      0 = fifo, 1 = first-fit
//! cos_id=<int>                 class of the writing thread
//! llc_cbm<N> 0x<hex>           capacity bitmask of class N
//! mba_delay<N> <uint>          throttle value of class N
//! force_ebs_counters <uint>    nonzero forces the EBS counter set
//! use_rapl_counters <0|1>      energy instead of occupancy counters
//! restart_edp | pause_edp | resume_edp
//! ```
//!
//! Integers follow C `scanf` conventions: `%i` accepts an optional sign
//! and decimal, `0x` hex or leading-zero octal; `%u` is decimal. Text
//! after a matched command is ignored.

use core::fmt::Write;
use core::sync::atomic::Ordering;

use rdtmon_core::{kinfo, CosId, MonError, MonResult, ProfilingContext, RmidAllocPolicy};

use crate::module::RdtModule;

/// A parsed configuration write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigCommand {
    RmidAllocPolicy(RmidAllocPolicy),
    CosId(i64),
    LlcCbm { cos: i64, mask: u64 },
    MbaDelay { cos: i64, value: u32 },
    ForceEbsCounters(u32),
    UseRaplCounters(bool),
    RestartEdp,
    PauseEdp,
    ResumeEdp,
}

impl ConfigCommand {
    pub fn parse(line: &str) -> MonResult<Self> {
        let invalid = |why: &str| MonError::InvalidConfig(format!("{}: {}", line.trim_end(), why));

        if let Some(rest) = line.strip_prefix("rmid_alloc_policy") {
            let (val, _) = scan_int(rest).ok_or_else(|| invalid("expected integer"))?;
            return RmidAllocPolicy::from_index(val)
                .map(ConfigCommand::RmidAllocPolicy)
                .ok_or_else(|| invalid("unknown policy"));
        }

        if let Some(rest) = line.strip_prefix("cos_id=") {
            let (val, _) = scan_int(rest).ok_or_else(|| invalid("expected integer"))?;
            return Ok(ConfigCommand::CosId(val));
        }

        if let Some(rest) = line.strip_prefix("llc_cbm") {
            let (cos, rest) = scan_int(rest).ok_or_else(|| invalid("expected class"))?;
            let rest = rest
                .trim_start()
                .strip_prefix("0x")
                .ok_or_else(|| invalid("expected 0x bitmask"))?;
            let (mask, _) = scan_hex(rest).ok_or_else(|| invalid("expected hex bitmask"))?;
            return Ok(ConfigCommand::LlcCbm { cos, mask });
        }

        if let Some(rest) = line.strip_prefix("mba_delay") {
            let (cos, rest) = scan_int(rest).ok_or_else(|| invalid("expected class"))?;
            let (value, _) = scan_uint(rest).ok_or_else(|| invalid("expected delay"))?;
            return Ok(ConfigCommand::MbaDelay { cos, value });
        }

        if let Some(rest) = line.strip_prefix("force_ebs_counters") {
            let (val, _) = scan_uint(rest).ok_or_else(|| invalid("expected integer"))?;
            return Ok(ConfigCommand::ForceEbsCounters(val));
        }

        if let Some(rest) = line.strip_prefix("use_rapl_counters") {
            return match scan_uint(rest) {
                Some((0, _)) => Ok(ConfigCommand::UseRaplCounters(false)),
                Some((1, _)) => Ok(ConfigCommand::UseRaplCounters(true)),
                _ => Err(invalid("expected 0 or 1")),
            };
        }

        if line.starts_with("restart_edp") {
            return Ok(ConfigCommand::RestartEdp);
        }
        if line.starts_with("pause_edp") {
            return Ok(ConfigCommand::PauseEdp);
        }
        if line.starts_with("resume_edp") {
            return Ok(ConfigCommand::ResumeEdp);
        }

        Err(invalid("unknown command"))
    }
}

fn skip_ws(s: &str) -> &str {
    s.trim_start_matches(|c: char| c.is_ascii_whitespace())
}

fn split_digits(s: &str, radix: u32) -> (&str, &str) {
    let end = s
        .char_indices()
        .find(|(_, c)| !c.is_digit(radix))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    s.split_at(end)
}

fn split_sign(s: &str) -> (bool, &str) {
    match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    }
}

/// `%i`: returns the value and the unread remainder
fn scan_int(s: &str) -> Option<(i64, &str)> {
    let (negative, s) = split_sign(skip_ws(s));

    let (radix, body) = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        if hex.starts_with(|c: char| c.is_ascii_hexdigit()) {
            (16, hex)
        } else {
            // "0x" without digits reads as 0
            return Some((0, &s[1..]));
        }
    } else if s.starts_with('0') {
        (8, s)
    } else {
        (10, s)
    };

    let (digits, rest) = split_digits(body, radix);
    if digits.is_empty() {
        return None;
    }
    let magnitude = i64::from_str_radix(digits, radix).ok()?;
    Some((if negative { -magnitude } else { magnitude }, rest))
}

/// `%u`: decimal; a negative value wraps like the C conversion does
fn scan_uint(s: &str) -> Option<(u32, &str)> {
    let (negative, s) = split_sign(skip_ws(s));
    let (digits, rest) = split_digits(s, 10);
    if digits.is_empty() {
        return None;
    }
    let magnitude = u32::try_from(digits.parse::<u64>().ok()?).ok()?;
    Some((if negative { magnitude.wrapping_neg() } else { magnitude }, rest))
}

/// `%x` without the prefix
fn scan_hex(s: &str) -> Option<(u64, &str)> {
    let (digits, rest) = split_digits(s, 16);
    if digits.is_empty() {
        return None;
    }
    Some((u64::from_str_radix(digits, 16).ok()?, rest))
}

fn class_id(cos: i64) -> MonResult<CosId> {
    u32::try_from(cos).map(CosId::new).map_err(|_| MonError::OutOfRange)
}

impl RdtModule {
    /// Apply one configuration line, reporting why it was rejected
    ///
    /// `caller` is the profiling context of the writing thread; `cos_id=`
    /// needs it.
    pub fn try_write_config(
        &self,
        line: &str,
        caller: Option<&mut ProfilingContext>,
    ) -> MonResult<usize> {
        match ConfigCommand::parse(line)? {
            ConfigCommand::RmidAllocPolicy(policy) => {
                self.pool.set_policy(policy);
                kinfo!("RMID allocation policy: {}", policy);
            }
            ConfigCommand::CosId(cos) => {
                let cos = class_id(cos)?;
                if !self.cos.is_valid_cos(cos) {
                    return Err(MonError::OutOfRange);
                }
                let record = caller
                    .and_then(|prof| prof.record_mut())
                    .ok_or(MonError::NoRecord)?;
                record.set_cos(cos);
                kinfo!("COS {} set for the calling thread", cos);
            }
            ConfigCommand::LlcCbm { cos, mask } => {
                self.cos.set_bitmask(class_id(cos)?, mask)?;
            }
            ConfigCommand::MbaDelay { cos, value } => {
                self.cos.set_throttle(class_id(cos)?, value)?;
            }
            ConfigCommand::ForceEbsCounters(value) => {
                self.force_ebs.store(value, Ordering::Relaxed);
            }
            ConfigCommand::UseRaplCounters(on) => {
                self.use_rapl.store(on, Ordering::Relaxed);
            }
            ConfigCommand::RestartEdp => {
                kinfo!("Resetting global EDP counters");
                self.edp.restart();
            }
            ConfigCommand::PauseEdp => {
                kinfo!("Pause global EDP counts");
                self.edp.pause();
            }
            ConfigCommand::ResumeEdp => {
                kinfo!("Resume global EDP counts");
                self.edp.resume();
            }
        }
        Ok(line.len())
    }

    /// Text returned by a configuration read
    pub fn render_config(&self) -> String {
        let mut out = String::new();
        let policy = self.pool.policy();
        let cat = self.cos.cat_support();
        let mba = self.cos.mba_support();

        let _ = writeln!(out, "rmid_alloc_policy={} ({})", policy.as_index(), policy);
        let _ = writeln!(out, "cat_nr_cos_available={}", cat.nr_cos_available);
        let _ = writeln!(out, "cat_cbm_length={}", cat.cbm_length);
        if mba.supported {
            let _ = writeln!(out, "mba_max_delay={}", mba.max_throttling);
            let _ = writeln!(out, "mba_cos_available={}", mba.nr_cos_available);
            let _ = writeln!(out, "mba_linear_throttling={}", mba.linear as u8);
        }
        self.cos.render_bitmasks(&mut out);
        self.cos.render_delays(&mut out);
        let _ = writeln!(out, "force_ebs_counters={}", self.force_ebs_counters_value());
        let _ = writeln!(out, "use_rapl_counters={}", self.uses_rapl_counters() as u8);
        self.edp.dump(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModuleConfig;
    use crate::sim::{SimConfig, SimHardware};
    use rdtmon_core::{CloneFlags, MbaSupport, MonitoringHooks};

    fn module() -> RdtModule {
        let sim = SimHardware::new(SimConfig::default());
        RdtModule::enable(sim.hardware(), ModuleConfig::new()).unwrap()
    }

    #[test]
    fn test_scan_int_c_rules() {
        assert_eq!(scan_int(" 42"), Some((42, "")));
        assert_eq!(scan_int("0x1F rest"), Some((31, " rest")));
        assert_eq!(scan_int("017"), Some((15, "")));
        assert_eq!(scan_int("-3"), Some((-3, "")));
        assert_eq!(scan_int("+0"), Some((0, "")));
        assert_eq!(scan_int("09"), Some((0, "9")));
        assert_eq!(scan_int("0xg"), Some((0, "xg")));
        assert_eq!(scan_int("abc"), None);
        assert_eq!(scan_int(""), None);
    }

    #[test]
    fn test_scan_uint() {
        assert_eq!(scan_uint(" 7\n"), Some((7, "\n")));
        assert_eq!(scan_uint("-1"), Some((u32::MAX, "")));
        assert_eq!(scan_uint("x"), None);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            ConfigCommand::parse("rmid_alloc_policy 1\n"),
            Ok(ConfigCommand::RmidAllocPolicy(RmidAllocPolicy::FirstFit))
        );
        assert_eq!(
            ConfigCommand::parse("rmid_alloc_policy 0x0"),
            Ok(ConfigCommand::RmidAllocPolicy(RmidAllocPolicy::Fifo))
        );
        assert_eq!(ConfigCommand::parse("cos_id=2"), Ok(ConfigCommand::CosId(2)));
        assert_eq!(
            ConfigCommand::parse("llc_cbm3 0x7f"),
            Ok(ConfigCommand::LlcCbm { cos: 3, mask: 0x7f })
        );
        assert_eq!(
            ConfigCommand::parse("mba_delay1 30"),
            Ok(ConfigCommand::MbaDelay { cos: 1, value: 30 })
        );
        assert_eq!(
            ConfigCommand::parse("force_ebs_counters 2"),
            Ok(ConfigCommand::ForceEbsCounters(2))
        );
        assert_eq!(
            ConfigCommand::parse("use_rapl_counters 0"),
            Ok(ConfigCommand::UseRaplCounters(false))
        );
        assert_eq!(ConfigCommand::parse("pause_edp\n"), Ok(ConfigCommand::PauseEdp));
        assert_eq!(ConfigCommand::parse("restart_edp"), Ok(ConfigCommand::RestartEdp));
        assert_eq!(ConfigCommand::parse("resume_edp"), Ok(ConfigCommand::ResumeEdp));
    }

    #[test]
    fn test_parse_rejects() {
        for line in [
            "rmid_alloc_policy 2",
            "rmid_alloc_policy fifo",
            "llc_cbm0 7f",
            "mba_delay0",
            "use_rapl_counters 2",
            "frobnicate",
            "",
        ] {
            assert!(
                matches!(ConfigCommand::parse(line), Err(MonError::InvalidConfig(_))),
                "{:?} should be rejected",
                line
            );
        }
    }

    #[test]
    fn test_cbm_round_trip() {
        let module = module();
        let before = module.read_config();

        assert_eq!(module.write_config("llc_cbm0 0x7f", None), "llc_cbm0 0x7f".len());
        let after = module.read_config();

        assert!(after.contains("llc_cbm0=0x7f\n"));
        for cos in 1..4 {
            let line = format!("llc_cbm{}=0x7ff\n", cos);
            assert!(before.contains(&line));
            assert!(after.contains(&line));
        }
    }

    #[test]
    fn test_invalid_writes_report_full_length() {
        let module = module();
        let before = module.render_config();

        for line in ["llc_cbm9 0x1", "llc_cbm0 0x0", "llc_cbm0 0x5", "mba_delay0 500", "bogus"] {
            assert_eq!(module.write_config(line, None), line.len());
        }
        // EDP lines carry live time and energy
        let settings = |s: &str| s[..s.find("edp_").unwrap_or(s.len())].to_string();
        assert_eq!(settings(&module.render_config()), settings(&before));
        assert_eq!(module.try_write_config("llc_cbm9 0x1", None), Err(MonError::OutOfRange));
        assert_eq!(module.try_write_config("llc_cbm-1 0x1", None), Err(MonError::OutOfRange));
    }

    #[test]
    fn test_policy_switch() {
        let module = module();
        module.write_config("rmid_alloc_policy 1", None);
        assert_eq!(module.pool().policy(), RmidAllocPolicy::FirstFit);
        assert!(module.read_config().starts_with("rmid_alloc_policy=1 (first-fit)\n"));
    }

    #[test]
    fn test_cos_id_needs_record() {
        let module = module();
        assert_eq!(module.try_write_config("cos_id=1", None), Err(MonError::NoRecord));

        let mut prof = ProfilingContext::new(0);
        module.on_fork(CloneFlags::PROCESS, None, &mut prof).unwrap();
        assert_eq!(module.try_write_config("cos_id=4", Some(&mut prof)), Err(MonError::OutOfRange));
        assert_eq!(module.try_write_config("cos_id=0x2", Some(&mut prof)), Ok(10));
        assert_eq!(prof.record().unwrap().cos(), CosId::new(2));
    }

    #[test]
    fn test_mba_delay_and_render() {
        let module = module();
        module.write_config("mba_delay2 40", None);
        let out = module.read_config();

        assert!(out.contains("mba_max_delay=90\n"));
        assert!(out.contains("mba_cos_available=4\n"));
        assert!(out.contains("mba_linear_throttling=1\n"));
        assert!(out.contains("mba_delay2=40\n"));
        assert!(out.contains("force_ebs_counters=0\nuse_rapl_counters=0\n"));
        assert!(out.contains("edp_active=1\n"));
    }

    #[test]
    fn test_render_without_mba() {
        let sim = SimHardware::new(SimConfig {
            mba: MbaSupport::UNSUPPORTED,
            ..SimConfig::default()
        });
        let module = RdtModule::enable(sim.hardware(), ModuleConfig::new()).unwrap();
        let out = module.read_config();

        assert!(!out.contains("mba_"));
        assert_eq!(module.try_write_config("mba_delay0 10", None), Err(MonError::Unsupported));
    }

    #[test]
    fn test_pause_edp_twice() {
        let module = module();
        module.write_config("pause_edp", None);
        let once = module.edp().totals();
        module.write_config("pause_edp", None);
        let twice = module.edp().totals();

        assert!(!once.active);
        assert_eq!(once, twice);

        module.write_config("resume_edp", None);
        assert!(module.edp().is_active());
    }

    #[test]
    fn test_flag_writes() {
        let module = module();
        module.write_config("force_ebs_counters 5", None);
        module.write_config("use_rapl_counters 1", None);
        assert!(module.forces_ebs_counters());
        assert!(module.uses_rapl_counters());
        // Stored as written, not folded to a flag
        assert!(module.read_config().contains("force_ebs_counters=5
use_rapl_counters=1
"));

        module.write_config("use_rapl_counters 7", None);
        assert!(module.uses_rapl_counters());
        module.write_config("force_ebs_counters 0", None);
        assert!(!module.forces_ebs_counters());
    }
}
