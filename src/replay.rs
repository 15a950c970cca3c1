//! Motion traces for the replay binary
//!
//! Recorded traces are plain CSV, one `x,y,t_ms` sample per line. Blank lines
//! and lines starting with `#` are skipped, as is a non-numeric header line.

use anyhow::{bail, Context};
use std::f64::consts::TAU;
use std::path::Path;

use crate::sample::Sample;

/// Built-in synthetic motion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyntheticPath {
    /// Constant angular speed around a circle
    #[default]
    Circle,
    /// Constant velocity diagonal
    Line,
    /// Straight segments with sharp reversals
    Zigzag,
}

impl std::fmt::Display for SyntheticPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Circle => write!(f, "circle"),
            Self::Line => write!(f, "line"),
            Self::Zigzag => write!(f, "zigzag"),
        }
    }
}

impl std::str::FromStr for SyntheticPath {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "circle" | "orbit" => Ok(Self::Circle),
            "line" | "linear" => Ok(Self::Line),
            "zigzag" | "zig-zag" => Ok(Self::Zigzag),
            _ => Err(format!("Unknown synthetic path: {}", s)),
        }
    }
}

impl SyntheticPath {
    /// Position at `t_ms`
    pub fn position(&self, t_ms: f64) -> (f64, f64) {
        match self {
            Self::Circle => {
                // One revolution per second, radius 200 around (500, 500)
                let angle = TAU * t_ms / 1000.0;
                (500.0 + 200.0 * angle.cos(), 500.0 + 200.0 * angle.sin())
            }
            Self::Line => (100.0 + 0.6 * t_ms, 100.0 + 0.3 * t_ms),
            Self::Zigzag => {
                // 250 ms legs, 0.8 px/ms
                let leg = 250.0;
                let phase = t_ms % (2.0 * leg);
                let x = if phase < leg { phase } else { 2.0 * leg - phase };
                (100.0 + 0.8 * x, 100.0 + 0.2 * t_ms)
            }
        }
    }

    /// Samples every `interval_ms` over `[0, duration_ms)`
    pub fn samples(&self, duration_ms: f64, interval_ms: f64) -> Vec<Sample> {
        if interval_ms <= 0.0 || duration_ms <= 0.0 {
            return Vec::new();
        }
        let n = (duration_ms / interval_ms).ceil() as usize;
        (0..n)
            .map(|i| {
                let t = i as f64 * interval_ms;
                Sample::new(self.position(t), t)
            })
            .collect()
    }
}

/// Parse a CSV trace
pub fn parse_trace(content: &str) -> anyhow::Result<Vec<Sample>> {
    let mut samples = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != 3 {
            bail!("line {}: expected x,y,t_ms, got {:?}", index + 1, line);
        }

        let parsed: Result<Vec<f64>, _> = fields.iter().map(|f| f.parse::<f64>()).collect();
        let values = match parsed {
            Ok(values) => values,
            // Header row
            Err(_) if samples.is_empty() && index == 0 => continue,
            Err(e) => {
                return Err(e).with_context(|| format!("line {}: invalid number", index + 1));
            }
        };

        let sample = Sample::new((values[0], values[1]), values[2]);
        if !sample.is_finite() {
            bail!("line {}: non-finite value", index + 1);
        }
        samples.push(sample);
    }

    Ok(samples)
}

/// Load a CSV trace from disk
pub fn load_trace(path: impl AsRef<Path>) -> anyhow::Result<Vec<Sample>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read trace file: {}", path.display()))?;
    parse_trace(&content).with_context(|| format!("Failed to parse trace: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_with_header_and_comments() {
        let trace = "x,y,t_ms\n# recorded\n1,2,0\n\n3.5, 4 ,8\n";
        let samples = parse_trace(trace).unwrap();
        assert_eq!(
            samples,
            vec![
                Sample::new((1.0, 2.0), 0.0),
                Sample::new((3.5, 4.0), 8.0)
            ]
        );
    }

    #[test]
    fn test_parse_rejects_bad_lines() {
        assert!(parse_trace("1,2,0\n1,2\n").is_err());
        assert!(parse_trace("1,2,0\nfoo,2,8\n").is_err());
        assert!(parse_trace("1,2,NaN\n").is_err());
    }

    #[test]
    fn test_load_trace() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0,0,0\n1,1,4\n2,2,8").unwrap();
        assert_eq!(load_trace(file.path()).unwrap().len(), 3);
    }

    #[test]
    fn test_synthetic_samples() {
        let samples = SyntheticPath::Line.samples(100.0, 8.0);
        assert_eq!(samples.len(), 13);
        assert_eq!(samples[1].timestamp, 8.0);
        assert!(SyntheticPath::Circle.samples(0.0, 8.0).is_empty());
    }

    #[test]
    fn test_circle_radius() {
        for t in [0.0, 130.0, 777.0] {
            let (x, y) = SyntheticPath::Circle.position(t);
            let r = (x - 500.0).hypot(y - 500.0);
            assert!((r - 200.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_path_from_str() {
        assert_eq!("ZigZag".parse::<SyntheticPath>().unwrap(), SyntheticPath::Zigzag);
        assert!("spiral".parse::<SyntheticPath>().is_err());
    }
}
