//! Master shutter and ISO tables for the EOS property scale.
//!
//! Each entry maps the human-readable label to the opaque parameter code the
//! body understands. Attached bodies only advertise a subset of these; the
//! controller filters the master table against that set on connect, and the
//! filtered table's length defines the valid index range. An index past the
//! end selects the Bulb / Auto sentinel instead of a table row.

/// Parameter code for the Bulb shutter setting (not a table row).
pub const BULB_PARAM: u32 = 0x0C;

/// Parameter code for automatic ISO selection (not a table row).
pub const ISO_AUTO_PARAM: u32 = 0x00;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutterEntry {
    pub label: &'static str,
    pub param: u32,
    /// Nominal exposure length of this native step.
    pub duration_us: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsoEntry {
    pub label: &'static str,
    pub param: u32,
}

const fn sec(tenths: i64) -> i64 {
    tenths * 100_000
}

const fn frac(denominator: i64) -> i64 {
    1_000_000 / denominator
}

pub const SHUTTER_TABLE: &[ShutterEntry] = &[
    ShutterEntry { label: "30\"", param: 0x10, duration_us: sec(300) },
    ShutterEntry { label: "25\"", param: 0x13, duration_us: sec(250) },
    ShutterEntry { label: "20\"", param: 0x14, duration_us: sec(200) },
    ShutterEntry { label: "15\"", param: 0x18, duration_us: sec(150) },
    ShutterEntry { label: "13\"", param: 0x1B, duration_us: sec(130) },
    ShutterEntry { label: "10\"", param: 0x1C, duration_us: sec(100) },
    ShutterEntry { label: "8\"", param: 0x20, duration_us: sec(80) },
    ShutterEntry { label: "6\"", param: 0x24, duration_us: sec(60) },
    ShutterEntry { label: "5\"", param: 0x25, duration_us: sec(50) },
    ShutterEntry { label: "4\"", param: 0x28, duration_us: sec(40) },
    ShutterEntry { label: "3\"2", param: 0x2B, duration_us: sec(32) },
    ShutterEntry { label: "3\"", param: 0x2C, duration_us: sec(30) },
    ShutterEntry { label: "2\"5", param: 0x2D, duration_us: sec(25) },
    ShutterEntry { label: "2\"", param: 0x30, duration_us: sec(20) },
    ShutterEntry { label: "1\"6", param: 0x33, duration_us: sec(16) },
    ShutterEntry { label: "1\"5", param: 0x34, duration_us: sec(15) },
    ShutterEntry { label: "1\"3", param: 0x35, duration_us: sec(13) },
    ShutterEntry { label: "1\"", param: 0x38, duration_us: sec(10) },
    ShutterEntry { label: "0\"8", param: 0x3B, duration_us: sec(8) },
    ShutterEntry { label: "0\"7", param: 0x3C, duration_us: sec(7) },
    ShutterEntry { label: "0\"6", param: 0x3D, duration_us: sec(6) },
    ShutterEntry { label: "0\"5", param: 0x40, duration_us: sec(5) },
    ShutterEntry { label: "0\"4", param: 0x43, duration_us: sec(4) },
    ShutterEntry { label: "0\"3", param: 0x44, duration_us: sec(3) },
    ShutterEntry { label: "1/4", param: 0x48, duration_us: frac(4) },
    ShutterEntry { label: "1/5", param: 0x4B, duration_us: frac(5) },
    ShutterEntry { label: "1/6", param: 0x4C, duration_us: frac(6) },
    ShutterEntry { label: "1/8", param: 0x50, duration_us: frac(8) },
    ShutterEntry { label: "1/10", param: 0x54, duration_us: frac(10) },
    ShutterEntry { label: "1/13", param: 0x55, duration_us: frac(13) },
    ShutterEntry { label: "1/15", param: 0x58, duration_us: frac(15) },
    ShutterEntry { label: "1/20", param: 0x5C, duration_us: frac(20) },
    ShutterEntry { label: "1/25", param: 0x5D, duration_us: frac(25) },
    ShutterEntry { label: "1/30", param: 0x60, duration_us: frac(30) },
    ShutterEntry { label: "1/40", param: 0x63, duration_us: frac(40) },
    ShutterEntry { label: "1/45", param: 0x64, duration_us: frac(45) },
    ShutterEntry { label: "1/50", param: 0x65, duration_us: frac(50) },
    ShutterEntry { label: "1/60", param: 0x68, duration_us: frac(60) },
    ShutterEntry { label: "1/80", param: 0x6B, duration_us: frac(80) },
    ShutterEntry { label: "1/90", param: 0x6C, duration_us: frac(90) },
    ShutterEntry { label: "1/100", param: 0x6D, duration_us: frac(100) },
    ShutterEntry { label: "1/125", param: 0x70, duration_us: frac(125) },
    ShutterEntry { label: "1/160", param: 0x73, duration_us: frac(160) },
    ShutterEntry { label: "1/180", param: 0x74, duration_us: frac(180) },
    ShutterEntry { label: "1/200", param: 0x75, duration_us: frac(200) },
    ShutterEntry { label: "1/250", param: 0x78, duration_us: frac(250) },
    ShutterEntry { label: "1/320", param: 0x7B, duration_us: frac(320) },
    ShutterEntry { label: "1/350", param: 0x7C, duration_us: frac(350) },
    ShutterEntry { label: "1/400", param: 0x7D, duration_us: frac(400) },
    ShutterEntry { label: "1/500", param: 0x80, duration_us: frac(500) },
    ShutterEntry { label: "1/640", param: 0x83, duration_us: frac(640) },
    ShutterEntry { label: "1/750", param: 0x84, duration_us: frac(750) },
    ShutterEntry { label: "1/800", param: 0x85, duration_us: frac(800) },
    ShutterEntry { label: "1/1000", param: 0x88, duration_us: frac(1000) },
    ShutterEntry { label: "1/1250", param: 0x8B, duration_us: frac(1250) },
    ShutterEntry { label: "1/1500", param: 0x8C, duration_us: frac(1500) },
    ShutterEntry { label: "1/1600", param: 0x8D, duration_us: frac(1600) },
    ShutterEntry { label: "1/2000", param: 0x90, duration_us: frac(2000) },
    ShutterEntry { label: "1/2500", param: 0x93, duration_us: frac(2500) },
    ShutterEntry { label: "1/3000", param: 0x94, duration_us: frac(3000) },
    ShutterEntry { label: "1/3200", param: 0x95, duration_us: frac(3200) },
    ShutterEntry { label: "1/4000", param: 0x98, duration_us: frac(4000) },
    ShutterEntry { label: "1/5000", param: 0x9B, duration_us: frac(5000) },
    ShutterEntry { label: "1/6000", param: 0x9C, duration_us: frac(6000) },
    ShutterEntry { label: "1/6400", param: 0x9D, duration_us: frac(6400) },
    ShutterEntry { label: "1/8000", param: 0xA0, duration_us: frac(8000) },
    ShutterEntry { label: "1/10000", param: 0xA3, duration_us: frac(10000) },
    ShutterEntry { label: "1/12800", param: 0xA5, duration_us: frac(12800) },
    ShutterEntry { label: "1/16000", param: 0xA8, duration_us: frac(16000) },
];

pub const ISO_TABLE: &[IsoEntry] = &[
    IsoEntry { label: "50", param: 0x40 },
    IsoEntry { label: "100", param: 0x48 },
    IsoEntry { label: "125", param: 0x4B },
    IsoEntry { label: "160", param: 0x4D },
    IsoEntry { label: "200", param: 0x50 },
    IsoEntry { label: "250", param: 0x53 },
    IsoEntry { label: "320", param: 0x55 },
    IsoEntry { label: "400", param: 0x58 },
    IsoEntry { label: "500", param: 0x5B },
    IsoEntry { label: "640", param: 0x5D },
    IsoEntry { label: "800", param: 0x60 },
    IsoEntry { label: "1000", param: 0x63 },
    IsoEntry { label: "1250", param: 0x65 },
    IsoEntry { label: "1600", param: 0x68 },
    IsoEntry { label: "2000", param: 0x6B },
    IsoEntry { label: "2500", param: 0x6D },
    IsoEntry { label: "3200", param: 0x70 },
    IsoEntry { label: "4000", param: 0x73 },
    IsoEntry { label: "5000", param: 0x75 },
    IsoEntry { label: "6400", param: 0x78 },
    IsoEntry { label: "8000", param: 0x7B },
    IsoEntry { label: "10000", param: 0x7D },
    IsoEntry { label: "12800", param: 0x80 },
    IsoEntry { label: "16000", param: 0x83 },
    IsoEntry { label: "20000", param: 0x85 },
    IsoEntry { label: "25600", param: 0x88 },
    IsoEntry { label: "32000", param: 0x8B },
    IsoEntry { label: "40000", param: 0x8D },
    IsoEntry { label: "51200", param: 0x90 },
];

/// Keep the master entries the body advertises, in the body's order.
pub fn filter_shutter(advertised: &[u32]) -> Vec<ShutterEntry> {
    advertised
        .iter()
        .filter_map(|param| SHUTTER_TABLE.iter().find(|e| e.param == *param))
        .copied()
        .collect()
}

pub fn filter_iso(advertised: &[u32]) -> Vec<IsoEntry> {
    advertised
        .iter()
        .filter_map(|param| ISO_TABLE.iter().find(|e| e.param == *param))
        .copied()
        .collect()
}

/// Longest native exposure the filtered table can express; custom exposures
/// beyond this only make sense in Bulb.
pub fn longest_native_us(table: &[ShutterEntry]) -> i64 {
    table.iter().map(|e| e.duration_us).max().unwrap_or(0)
}

/// Parse a shutter-speed label into an exposure length.
///
/// Accepts both the EOS display style (`30"`, `0"5`, `1/60`) and the decimal
/// style libgphoto2 reports (`30`, `0.5`, `1/60`). Returns `None` for
/// non-numeric labels such as `bulb` or `auto`.
pub fn parse_shutter_label(label: &str) -> Option<i64> {
    let label = label.trim();

    if let Some(denominator) = label.strip_prefix("1/") {
        let denominator: f64 = denominator.parse().ok()?;
        if denominator <= 0.0 {
            return None;
        }
        return Some((1_000_000.0 / denominator).round() as i64);
    }

    let seconds: f64 = if label.contains('"') {
        // 2"5 is 2.5 seconds, 30" is 30 seconds
        label.replacen('"', ".", 1).trim_end_matches('.').parse().ok()?
    } else {
        label.parse().ok()?
    };

    if seconds <= 0.0 {
        return None;
    }
    Some((seconds * 1_000_000.0).round() as i64)
}

/// Match an advertised shutter label to a master entry by exposure length.
///
/// libgphoto2 rounds some fractional steps (`1/3` shows as `0.3`), so the
/// match tolerates a 20% relative difference and picks the closest entry.
pub fn shutter_entry_for_label(label: &str) -> Option<ShutterEntry> {
    let duration_us = parse_shutter_label(label)?;
    let entry = SHUTTER_TABLE
        .iter()
        .min_by_key(|e| (e.duration_us - duration_us).abs())?;

    let error = (entry.duration_us - duration_us).abs();
    if error * 5 <= duration_us {
        Some(*entry)
    } else {
        None
    }
}
