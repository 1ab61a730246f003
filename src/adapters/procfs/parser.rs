use std::collections::HashMap;

use thiserror::Error;

use crate::domain::IoMetrics;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Missing field: {0}")]
    MissingField(String),
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Parse /proc/uptime
pub fn parse_uptime(content: &str) -> ParseResult<f64> {
    let first = content
        .split_whitespace()
        .next()
        .ok_or_else(|| ParseError::Parse("Empty uptime file".to_string()))?;

    first
        .parse::<f64>()
        .map_err(|e| ParseError::Parse(format!("Invalid uptime value: {}", e)))
}

/// CPU stats from /proc/stat
#[derive(Debug, Clone, Default)]
pub struct CpuStat {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuStat {
    pub fn total(&self) -> u64 {
        self.user + self.nice + self.system + self.idle + self.iowait + self.irq + self.softirq + self.steal
    }

    pub fn busy(&self) -> u64 {
        self.total() - self.idle - self.iowait
    }
}

/// Parse /proc/stat (first line only for aggregate CPU)
pub fn parse_cpu_stat(content: &str) -> ParseResult<CpuStat> {
    let first_line = content
        .lines()
        .next()
        .ok_or_else(|| ParseError::Parse("Empty stat file".to_string()))?;

    if !first_line.starts_with("cpu ") {
        return Err(ParseError::Parse("Missing cpu line".to_string()));
    }

    let parts: Vec<&str> = first_line.split_whitespace().skip(1).collect();
    if parts.len() < 8 {
        return Err(ParseError::Parse("Incomplete cpu stat".to_string()));
    }

    let field = |i: usize, name: &str| -> ParseResult<u64> {
        parts[i]
            .parse()
            .map_err(|e| ParseError::Parse(format!("{}: {}", name, e)))
    };

    Ok(CpuStat {
        user: field(0, "user")?,
        nice: field(1, "nice")?,
        system: field(2, "system")?,
        idle: field(3, "idle")?,
        iowait: field(4, "iowait")?,
        irq: field(5, "irq")?,
        softirq: field(6, "softirq")?,
        steal: field(7, "steal")?,
    })
}

/// Parse /proc/meminfo into a map of bytes
pub fn parse_meminfo(content: &str) -> ParseResult<HashMap<String, u64>> {
    let mut map = HashMap::new();

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };

        let value_str = value.trim().trim_end_matches(" kB");
        if let Ok(value) = value_str.parse::<u64>() {
            map.insert(key.trim().to_string(), value * 1024); // Convert kB to bytes
        }
    }

    Ok(map)
}

/// Fields of /proc/{pid}/stat used by the supervisor
#[derive(Debug, Clone, PartialEq)]
pub struct ProcStat {
    pub pid: u32,
    pub ppid: u32,
    pub state: char,
    pub utime: u64,
    pub stime: u64,
    pub num_threads: u64,
    pub starttime: u64,
    pub rss_pages: u64,
}

/// Parse /proc/{pid}/stat
pub fn parse_proc_stat(content: &str) -> ParseResult<ProcStat> {
    // Format: pid (comm) state ppid ... ; comm may contain spaces and parentheses
    let start = content.find('(').ok_or_else(|| ParseError::Parse("No ( found".to_string()))?;
    let end = content.rfind(')').ok_or_else(|| ParseError::Parse("No ) found".to_string()))?;

    let pid_str = content[..start].trim();
    let parts: Vec<&str> = content[end + 1..].split_whitespace().collect();
    if parts.len() < 22 {
        return Err(ParseError::Parse("Incomplete proc stat".to_string()));
    }

    // parts[n] is field n + 3 of proc(5)
    let field = |i: usize, name: &str| -> ParseResult<u64> {
        parts[i]
            .parse()
            .map_err(|e| ParseError::Parse(format!("{}: {}", name, e)))
    };

    Ok(ProcStat {
        pid: pid_str.parse().map_err(|e| ParseError::Parse(format!("pid: {}", e)))?,
        ppid: parts[1].parse().map_err(|e| ParseError::Parse(format!("ppid: {}", e)))?,
        state: parts[0].chars().next().unwrap_or('?'),
        utime: field(11, "utime")?,
        stime: field(12, "stime")?,
        num_threads: field(17, "num_threads")?,
        starttime: field(19, "starttime")?,
        rss_pages: field(21, "rss")?,
    })
}

/// Fields of /proc/{pid}/status used by the supervisor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcStatus {
    pub uid: Option<u32>,
    pub vm_rss_bytes: Option<u64>,
    pub threads: Option<u64>,
}

/// Parse /proc/{pid}/status
pub fn parse_proc_status(content: &str) -> ParseResult<ProcStatus> {
    let mut status = ProcStatus::default();

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let first = value.split_whitespace().next();
        match key {
            "Uid" => status.uid = first.and_then(|v| v.parse().ok()),
            "VmRSS" => status.vm_rss_bytes = first.and_then(|v| v.parse::<u64>().ok()).map(|kb| kb * 1024),
            "Threads" => status.threads = first.and_then(|v| v.parse().ok()),
            _ => {}
        }
    }

    if status.uid.is_none() {
        return Err(ParseError::MissingField("Uid".to_string()));
    }
    Ok(status)
}

/// Parse /proc/{pid}/io
pub fn parse_proc_io(content: &str) -> ParseResult<IoMetrics> {
    let mut read_bytes = None;
    let mut write_bytes = None;

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let parsed = value.trim().parse::<u64>().ok();
        match key.trim() {
            "read_bytes" => read_bytes = parsed,
            "write_bytes" => write_bytes = parsed,
            _ => {}
        }
    }

    match (read_bytes, write_bytes) {
        (Some(read), Some(write)) => Ok(IoMetrics::new(read, write)),
        (None, _) => Err(ParseError::MissingField("read_bytes".to_string())),
        (_, None) => Err(ParseError::MissingField("write_bytes".to_string())),
    }
}
