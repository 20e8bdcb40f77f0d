use super::{ProcessCollector, ProcessSample, SkipReason};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

#[derive(Clone)]
struct CpuSample {
    total_ticks: u64, // utime + stime
    timestamp: Instant,
}

/// Fields of `/proc/<pid>/stat` the scanner uses.
#[derive(Debug, PartialEq)]
struct StatFields {
    name: String,
    ppid: i64,
    total_ticks: u64,
    rss_pages: u64,
}

pub struct LinuxProcessCollector {
    proc_root: PathBuf,
    page_size: u64,
    clock_ticks: u64,
    cpu_samples: Mutex<HashMap<u32, CpuSample>>,
}

impl LinuxProcessCollector {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    /// Reads from a procfs mounted somewhere other than `/proc`.
    pub fn with_root(proc_root: impl Into<PathBuf>) -> Self {
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        let clock_ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        Self {
            proc_root: proc_root.into(),
            page_size: if page_size > 0 { page_size as u64 } else { 4096 },
            clock_ticks: if clock_ticks > 0 { clock_ticks as u64 } else { 100 },
            cpu_samples: Mutex::new(HashMap::new()),
        }
    }

    fn total_memory_bytes(&self) -> Option<u64> {
        let meminfo = fs::read_to_string(self.proc_root.join("meminfo")).ok()?;
        meminfo
            .lines()
            .find_map(|line| line.strip_prefix("MemTotal:"))
            .and_then(|rest| rest.trim().trim_end_matches("kB").trim().parse::<u64>().ok())
            .map(|kb| kb.saturating_mul(1024))
    }

    fn list_pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = fs::read_dir(&self.proc_root)
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
                    .collect()
            })
            .unwrap_or_default();
        pids.sort_unstable();
        pids
    }

    /// Reads a single process outside of a scan.
    pub fn read_process(&self, pid: u32) -> Result<ProcessSample, SkipReason> {
        self.parse_process(pid, self.total_memory_bytes())
    }

    fn parse_process(&self, pid: u32, total_memory: Option<u64>) -> Result<ProcessSample, SkipReason> {
        let proc_dir = self.proc_root.join(pid.to_string());
        let stat_content = read_proc_file(&proc_dir.join("stat"), pid)?;
        let stat = parse_stat(&stat_content).ok_or_else(|| SkipReason::Unreadable {
            pid: pid as i64,
            detail: "malformed stat".to_string(),
        })?;

        let now = Instant::now();

        // CPU percentage relative to this process's previous sample
        let cpu_percent = {
            let mut samples = self.cpu_samples.lock().unwrap_or_else(|e| e.into_inner());
            let percent = match samples.get(&pid) {
                Some(prev) => {
                    let tick_delta = stat.total_ticks.saturating_sub(prev.total_ticks);
                    let time_delta = now.duration_since(prev.timestamp).as_secs_f64();
                    if time_delta > 0.0 {
                        let cpu_seconds = tick_delta as f64 / self.clock_ticks as f64;
                        (cpu_seconds / time_delta) * 100.0
                    } else {
                        0.0
                    }
                }
                None => 0.0,
            };
            samples.insert(pid, CpuSample { total_ticks: stat.total_ticks, timestamp: now });
            percent
        };

        let memory_percent = total_memory
            .filter(|total| *total > 0)
            .map(|total| stat.rss_pages.saturating_mul(self.page_size) as f64 / total as f64 * 100.0);

        Ok(ProcessSample {
            pid: pid as i64,
            parent_pid: Some(stat.ppid),
            name: Some(stat.name).filter(|n| !n.is_empty()),
            cpu_usage: Some(cpu_percent),
            memory_usage: memory_percent,
        })
    }

    /// Remove stale CPU samples for processes that no longer exist
    fn cleanup_stale(&self, active_pids: &[u32]) {
        let active: HashSet<&u32> = active_pids.iter().collect();
        let mut samples = self.cpu_samples.lock().unwrap_or_else(|e| e.into_inner());
        samples.retain(|pid, _| active.contains(pid));
    }
}

impl Default for LinuxProcessCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessCollector for LinuxProcessCollector {
    fn scan(&self) -> Box<dyn Iterator<Item = Result<ProcessSample, SkipReason>> + '_> {
        let pids = self.list_pids();
        self.cleanup_stale(&pids);
        let total_memory = self.total_memory_bytes();
        Box::new(pids.into_iter().map(move |pid| self.parse_process(pid, total_memory)))
    }
}

fn read_proc_file(path: &Path, pid: u32) -> Result<String, SkipReason> {
    fs::read_to_string(path).map_err(|e| skip_reason(pid, &e))
}

fn skip_reason(pid: u32, e: &io::Error) -> SkipReason {
    let pid = pid as i64;
    match e.kind() {
        io::ErrorKind::NotFound => SkipReason::Gone(pid),
        io::ErrorKind::PermissionDenied => SkipReason::AccessDenied(pid),
        _ if e.raw_os_error() == Some(libc::ESRCH) => SkipReason::Gone(pid),
        _ => SkipReason::Unreadable { pid, detail: e.to_string() },
    }
}

/// The command name is parenthesised and may itself contain spaces or
/// parentheses, so fields are counted from the last `)`.
fn parse_stat(content: &str) -> Option<StatFields> {
    let open = content.find('(')?;
    let close = content.rfind(')')?;
    let name = content.get(open + 1..close)?.to_string();
    // rest[0] is field 3 (state)
    let rest: Vec<&str> = content.get(close + 1..)?.split_whitespace().collect();
    if rest.len() < 22 {
        return None;
    }
    let utime: u64 = rest[11].parse().ok()?;
    let stime: u64 = rest[12].parse().ok()?;
    Some(StatFields {
        name,
        ppid: rest[1].parse().ok()?,
        total_ticks: utime.saturating_add(stime),
        rss_pages: rest[21].parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT: &str = "4242 (tmux: server) S 1 4242 4242 0 -1 4194624 1270 0 0 0 \
                        150 50 0 0 20 0 1 0 8412 12345678 900 18446744073709551615";

    #[test]
    fn test_parse_stat_handles_spaces_in_name() {
        let stat = parse_stat(STAT).unwrap();
        assert_eq!(
            stat,
            StatFields { name: "tmux: server".to_string(), ppid: 1, total_ticks: 200, rss_pages: 900 }
        );
    }

    #[test]
    fn test_parse_stat_rejects_truncated_line() {
        assert!(parse_stat("4242 (bash) S 1 4242").is_none());
        assert!(parse_stat("garbage").is_none());
    }

    #[test]
    fn test_parse_stat_saturates_huge_counters() {
        let max = u64::MAX;
        let line = format!("1 (x) S 0 1 1 0 -1 0 0 0 0 0 {max} {max} 0 0 20 0 1 0 5 1000 {max} 0");
        let stat = parse_stat(&line).unwrap();
        assert_eq!(stat.total_ticks, u64::MAX);
        assert_eq!(stat.rss_pages, u64::MAX);
    }

    #[test]
    fn test_skip_reason_classification() {
        let gone = io::Error::from(io::ErrorKind::NotFound);
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert_eq!(skip_reason(7, &gone), SkipReason::Gone(7));
        assert_eq!(skip_reason(7, &denied), SkipReason::AccessDenied(7));
        assert_eq!(skip_reason(7, &io::Error::from_raw_os_error(libc::ESRCH)), SkipReason::Gone(7));
    }
}
