// Parsers for the string values handed to `config(key, value)`.

use std::time::Duration;

use regex::Regex;

/// Parses a size such as `1024`, `4K`, `2M`, `1G` or `8s`.
///
/// Suffixes scale by powers of 1024 (`b`, `k`, `m`, `g`, `t`, `p`, `e`, any case),
/// `s` means 512-byte sectors. Results never exceed `i64::MAX`.
pub fn parse_size(size_str: &str) -> Result<u64, String> {
    let re = Regex::new(r"^(\d+)([bBkKmMgGtTpPeEsS]?)$").map_err(|e| e.to_string())?;
    let cap = match re.captures(size_str) {
        Some(cap) => cap,
        None => return Err(format!("could not parse size string: {:?}", size_str)),
    };

    let size: u64 = cap[1]
        .parse()
        .map_err(|_| format!("size exceeds maximum value: {:?}", size_str))?;
    let scale: u64 = match &cap[2] {
        "" | "b" | "B" => 1,
        "s" | "S" => 512,
        "k" | "K" => 1 << 10,
        "m" | "M" => 1 << 20,
        "g" | "G" => 1 << 30,
        "t" | "T" => 1 << 40,
        "p" | "P" => 1 << 50,
        "e" | "E" => 1 << 60,
        _ => return Err(format!("could not parse size: unknown suffix: {:?}", size_str)),
    };

    match size.checked_mul(scale) {
        Some(bytes) if bytes <= i64::MAX as u64 => Ok(bytes),
        _ => Err(format!("could not parse size: size * scale overflows: {:?}", size_str)),
    }
}

/// Parses `1/true/yes/on` and `0/false/no/off`, ignoring case.
pub fn parse_bool(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(format!("could not decipher boolean: {:?}", value)),
    }
}

/// Parses a duration like `500ms`, `30s`, `2m` or `1h`. A bare number is seconds.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let re = Regex::new(r"^(\d+)(ms|s|m|h)?$").map_err(|e| e.to_string())?;
    let cap = re
        .captures(value)
        .ok_or_else(|| format!("could not parse duration: {:?}", value))?;
    let amount: u64 = cap[1]
        .parse()
        .map_err(|_| format!("duration too large: {:?}", value))?;

    let duration = match cap.get(2).map(|m| m.as_str()) {
        Some("ms") => Duration::from_millis(amount),
        None | Some("s") => Duration::from_secs(amount),
        Some("m") => Duration::from_secs(amount.saturating_mul(60)),
        Some("h") => Duration::from_secs(amount.saturating_mul(3600)),
        Some(_) => return Err(format!("could not parse duration: {:?}", value)),
    };
    Ok(duration)
}
