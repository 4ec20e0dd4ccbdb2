//! SoC temperature probe

use std::path::{Path, PathBuf};
use tracing::debug;

/// Reads the kernel thermal zone, which reports millidegrees Celsius
#[derive(Debug, Clone)]
pub struct ThermalProbe {
    path: PathBuf,
}

impl ThermalProbe {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Temperature rounded to one decimal, `None` when unavailable
    pub async fn read(&self) -> Option<f32> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => parse_millidegrees(&content),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Thermal zone unavailable");
                None
            }
        }
    }
}

fn parse_millidegrees(content: &str) -> Option<f32> {
    let milli: i64 = content.trim().parse().ok()?;
    Some((milli as f32 / 100.0).round() / 10.0)
}

/// Bus payload for a temperature
pub fn format_celsius(celsius: f32) -> String {
    format!("{:.1}", celsius)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(parse_millidegrees("48312\n"), Some(48.3));
        assert_eq!(parse_millidegrees("-1500"), Some(-1.5));
        assert_eq!(parse_millidegrees("hot"), None);
        assert_eq!(format_celsius(48.3), "48.3");
        assert_eq!(format_celsius(50.0), "50.0");
    }

    #[tokio::test]
    async fn test_read_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temp");
        std::fs::write(&path, "51234\n").unwrap();

        assert_eq!(ThermalProbe::new(&path).read().await, Some(51.2));
        assert_eq!(ThermalProbe::new(dir.path().join("missing")).read().await, None);
    }
}
