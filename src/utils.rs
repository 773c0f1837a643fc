use std::time::{SystemTime, UNIX_EPOCH};

pub fn ts_hm() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

/// Wall-clock milliseconds since the UNIX epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Split `len` items into `parts` contiguous index ranges. The first
/// `len % parts` ranges get one extra item; empty ranges are skipped.
pub fn partition_ranges(len: usize, parts: usize) -> Vec<std::ops::Range<usize>> {
    if parts == 0 || len == 0 {
        return Vec::new();
    }

    let base = len / parts;
    let extra = len % parts;
    let mut ranges = Vec::with_capacity(parts.min(len));
    let mut start = 0;
    for i in 0..parts {
        let size = base + if i < extra { 1 } else { 0 };
        if size == 0 {
            break;
        }
        ranges.push(start..start + size);
        start += size;
    }
    ranges
}
