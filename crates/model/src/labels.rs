//! Human-readable labels derived from raw descriptor values
//!
//! All derivations are total functions over optional inputs: absent data
//! produces an "Unknown" label, never an error.

/// Map a link speed in Mbps to its USB marketing name.
///
/// Values outside the table fall back to `%.1f Gbps` at or above 1000 Mbps
/// and `%d Mbps` below.
pub fn speed_label(mbps: Option<u32>) -> String {
    let Some(mbps) = mbps else {
        return "Unknown speed".to_string();
    };
    match mbps {
        2 => "Low Speed".to_string(),
        12 => "Full Speed".to_string(),
        480 => "High Speed".to_string(),
        5000 => "SuperSpeed".to_string(),
        10000 => "SuperSpeed+".to_string(),
        20000 => "SuperSpeed+ 20Gbps".to_string(),
        n if n >= 1000 => format!("{:.1} Gbps", f64::from(n) / 1000.0),
        n => format!("{} Mbps", n),
    }
}

/// Map a binary-coded-decimal USB version to its specification name.
///
/// Unlisted versions decode the BCD digits into a generic `USB major.minor`
/// label.
pub fn version_label(bcd: Option<u16>) -> String {
    let Some(bcd) = bcd else {
        return "Unknown version".to_string();
    };
    match bcd {
        0x0100 => "USB 1.0".to_string(),
        0x0110 => "USB 1.1".to_string(),
        0x0200 => "USB 2.0".to_string(),
        0x0210 => "USB 2.1".to_string(),
        0x0300 => "USB 3.0".to_string(),
        0x0310 => "USB 3.1".to_string(),
        0x0320 => "USB 3.2".to_string(),
        0x0400 => "USB4".to_string(),
        0x0420 => "USB4 2.0".to_string(),
        _ => {
            let major = ((bcd >> 12) & 0xf) * 10 + ((bcd >> 8) & 0xf);
            let minor = (bcd >> 4) & 0xf;
            format!("USB {}.{}", major, minor)
        }
    }
}
