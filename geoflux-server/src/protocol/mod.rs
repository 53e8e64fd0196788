//! Row line protocol
//!
//! One row per line:
//!
//! ```text
//! dim=foo,dim.geo=1.0\,3.0 val=29i,score=0.5 1357084800000
//! ```
//!
//! Dimensions, then metrics, then an optional millisecond timestamp. Commas,
//! spaces and `=` inside keys or values are escaped with `\`. A repeated
//! dimension key adds another value. Blank lines and `#` comments are skipped.

use geoflux_core::{parse_timestamp, InputRow, MetricValue, Timestamp};

/// Parse a request body into rows, stamping rows without a timestamp with `now`
pub fn parse_rows(data: &str, now: Timestamp) -> Result<Vec<InputRow>, String> {
    data.lines()
        .enumerate()
        .map(|(n, line)| (n + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(n, line)| parse_line(line, now).map_err(|e| format!("line {}: {}", n, e)))
        .collect()
}

fn parse_line(line: &str, now: Timestamp) -> Result<InputRow, String> {
    let parts: Vec<&str> = split_unescaped(line, ' ')
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err("expected dimensions, metrics and an optional timestamp".to_string());
    }

    let timestamp = match parts.get(2) {
        Some(ts) => ts
            .parse::<i64>()
            .or_else(|_| parse_timestamp(ts))
            .map_err(|_| format!("invalid timestamp: {}", ts))?,
        None => now,
    };

    let mut row = InputRow::new(timestamp);
    for (key, value) in pairs(parts[0])? {
        row = row.with_dimension(key, value);
    }
    for (key, value) in pairs(parts[1])? {
        row = row.with_metric(key, parse_metric(&value));
    }
    Ok(row)
}

/// `k=v` pairs of one comma-separated section, unescaped
fn pairs(section: &str) -> Result<Vec<(String, String)>, String> {
    split_unescaped(section, ',')
        .into_iter()
        .map(|pair| match split_unescaped(pair, '=').as_slice() {
            [key, value] if !key.is_empty() => Ok((unescape(key), unescape(value))),
            _ => Err(format!("invalid pair: {}", pair)),
        })
        .collect()
}

fn parse_metric(value: &str) -> MetricValue {
    if let Some(quoted) = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        return MetricValue::String(quoted.to_string());
    }
    if let Some(n) = value.strip_suffix('i').and_then(|v| v.parse::<i64>().ok()) {
        return MetricValue::Long(n);
    }
    if let Ok(n) = value.parse::<i64>() {
        return MetricValue::Long(n);
    }
    match value.parse::<f64>() {
        Ok(n) => MetricValue::Double(n),
        // Left to the index, which drops or rejects it
        Err(_) => MetricValue::String(value.to_string()),
    }
}

/// Split on `sep` where it is not preceded by a backslash
fn split_unescaped(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == sep {
            parts.push(&s[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&s[start..]);
    parts
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        let row = parse_line("dim=foo,dim.geo=1.0\\,3.0 val=29i 1357084800000", 0).unwrap();
        assert_eq!(row.timestamp, 1_357_084_800_000);
        assert_eq!(row.dimensions["dim"], vec!["foo"]);
        assert_eq!(row.dimensions["dim.geo"], vec!["1.0,3.0"]);
        assert_eq!(row.metrics["val"], MetricValue::Long(29));
    }

    #[test]
    fn test_repeated_dimension_and_default_timestamp() {
        let row = parse_line("tag=a,tag=b,name=big\\ city score=2.5", 42).unwrap();
        assert_eq!(row.timestamp, 42);
        assert_eq!(row.dimensions["tag"], vec!["a", "b"]);
        assert_eq!(row.dimensions["name"], vec!["big city"]);
        assert_eq!(row.metrics["score"], MetricValue::Double(2.5));
    }

    #[test]
    fn test_metric_values() {
        assert_eq!(parse_metric("17i"), MetricValue::Long(17));
        assert_eq!(parse_metric("17"), MetricValue::Long(17));
        assert_eq!(parse_metric("-0.25"), MetricValue::Double(-0.25));
        assert_eq!(parse_metric("\"12\""), MetricValue::String("12".into()));
        assert_eq!(parse_metric("n/a"), MetricValue::String("n/a".into()));
    }

    #[test]
    fn test_parse_rows() {
        let body = "# reference points\n\
                    dim=foo,dim.geo=0.0\\,0.0 val=17i 2013-01-01T00:00:00Z\n\
                    \n\
                    dim=foo,dim.geo=_mmx.unknown val=501i 1357344000000\n";
        let rows = parse_rows(body, 0).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp, 1_356_998_400_000);
        assert_eq!(rows[1].dimensions["dim.geo"], vec!["_mmx.unknown"]);

        let err = parse_rows("dim=foo val=1i\nbroken", 0).unwrap_err();
        assert!(err.starts_with("line 2"));
        assert!(parse_rows("dim val=1i", 0).is_err());
        assert!(parse_rows("dim=a val=1i notatime", 0).is_err());
    }
}
