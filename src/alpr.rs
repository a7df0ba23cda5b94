use crate::config::Config;
use crate::error::Error;
use crate::types::RecognitionResult;
use async_trait::async_trait;
use log::{debug, warn};
use serde_json::json;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

#[async_trait]
pub trait Recognize: Send + Sync {
    async fn recognize(&self, image: &Path, region: &str) -> Result<RecognitionResult, Error>;
}

/// Runs the OpenALPR command line tool, one process per image.
#[derive(Debug, Clone)]
pub struct Alpr {
    bin: String,
    top_n: Option<u32>,
    timeout: Duration,
}

impl Alpr {
    pub fn new(config: &Config) -> Alpr {
        Alpr {
            bin: config.alpr_bin.clone(),
            top_n: config.top_n,
            timeout: config.timeout,
        }
    }

    fn command(&self, image: &Path, region: &str) -> Command {
        let mut command = Command::new(&self.bin);
        command.arg("-j").arg("-c").arg(region);
        if let Some(n) = self.top_n {
            command.arg("-n").arg(n.to_string());
        }
        command
            .arg(image)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl Recognize for Alpr {
    async fn recognize(&self, image: &Path, region: &str) -> Result<RecognitionResult, Error> {
        debug!("Running {} -c {} on {:?}", self.bin, region, image);
        let output = match timeout(self.timeout, self.command(image, region).output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(Error::recognition(format!(
                    "unable to run {}: {}",
                    self.bin, e
                )))
            }
            // Dropping the output future kills the child.
            Err(_) => {
                return Err(Error::recognition(format!(
                    "alpr timed out after {:?}",
                    self.timeout
                )))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = match (stderr.trim(), stdout.trim()) {
                ("", "") => format!("alpr exited with {}", output.status),
                ("", out) => out.to_string(),
                (err, _) => err.to_string(),
            };
            return Err(Error::recognition(detail));
        }
        Ok(parse_output(&stdout))
    }
}

/// Parses the tool's stdout. Anything that isn't JSON is relayed as
/// `{"raw": <text>}` with no detections.
pub fn parse_output(stdout: &str) -> RecognitionResult {
    match serde_json::from_str(stdout) {
        Ok(raw) => RecognitionResult::from_raw(raw),
        Err(e) => {
            warn!("alpr printed non-JSON output ({}), relaying it raw", e);
            RecognitionResult::from_raw(json!({ "raw": stdout }))
        }
    }
}

/// Tries each region in turn until one yields detections.
///
/// Returns the first run with detections, else the last run that
/// succeeded, else the last failure.
pub async fn recognize_any(
    recognizer: &dyn Recognize,
    image: &Path,
    regions: &[String],
) -> Result<(String, RecognitionResult), Error> {
    let mut found: Option<(String, RecognitionResult)> = None;
    let mut last_error = None;
    for region in regions {
        match recognizer.recognize(image, region).await {
            Ok(result) => {
                let done = !result.results.is_empty();
                found = Some((region.clone(), result));
                if done {
                    break;
                }
                debug!("No plates found with region {}", region);
            }
            Err(e) => {
                warn!("Recognition with region {} failed: {}", region, e);
                last_error = Some(e);
            }
        }
    }
    match (found, last_error) {
        (Some(found), _) => Ok(found),
        (None, Some(e)) => Err(e),
        (None, None) => Err(Error::recognition("no region to try")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Detection;
    use std::sync::Mutex;

    #[test]
    fn non_json_is_wrapped() {
        let result = parse_output("Error opening image\n");
        assert!(result.results.is_empty());
        assert_eq!(result.raw, json!({"raw": "Error opening image\n"}));
    }

    #[test]
    fn json_is_parsed() {
        let result = parse_output(r#"{"version":2,"results":[{"plate":"ABC123","confidence":88.5}]}"#);
        assert_eq!(result.results, vec![Detection::new("ABC123", 88.5)]);
        assert_eq!(result.raw["version"], json!(2));
    }

    /// Answers with a canned outcome per region and records every call.
    struct Scripted {
        calls: Mutex<Vec<String>>,
        answers: Vec<(&'static str, Option<usize>)>,
    }

    #[async_trait]
    impl Recognize for Scripted {
        async fn recognize(&self, _image: &Path, region: &str) -> Result<RecognitionResult, Error> {
            self.calls.lock().unwrap().push(region.to_string());
            match self.answers.iter().find(|(r, _)| *r == region) {
                Some((_, Some(n))) => Ok(RecognitionResult {
                    results: (0..*n).map(|i| Detection::new(&format!("P{}", i), 50.0)).collect(),
                    raw: json!({}),
                }),
                _ => Err(Error::recognition(format!("{} failed", region))),
            }
        }
    }

    fn regions(list: &[&str]) -> Vec<String> {
        list.iter().map(|r| r.to_string()).collect()
    }

    #[tokio::test]
    async fn stops_at_first_region_with_plates() {
        let recognizer = Scripted {
            calls: Mutex::new(vec![]),
            answers: vec![("eu", Some(0)), ("us", Some(2)), ("au", Some(1))],
        };
        let (region, result) = recognize_any(&recognizer, Path::new("x.jpg"), &regions(&["eu", "us", "au"]))
            .await
            .unwrap();
        assert_eq!(region, "us");
        assert_eq!(result.results.len(), 2);
        assert_eq!(*recognizer.calls.lock().unwrap(), vec!["eu", "us"]);
    }

    #[tokio::test]
    async fn keeps_last_success_without_plates() {
        let recognizer = Scripted {
            calls: Mutex::new(vec![]),
            answers: vec![("eu", Some(0))],
        };
        let (region, result) = recognize_any(&recognizer, Path::new("x.jpg"), &regions(&["eu", "us"]))
            .await
            .unwrap();
        assert_eq!(region, "eu");
        assert!(result.results.is_empty());
    }

    #[tokio::test]
    async fn reports_last_failure() {
        let recognizer = Scripted {
            calls: Mutex::new(vec![]),
            answers: vec![],
        };
        match recognize_any(&recognizer, Path::new("x.jpg"), &regions(&["eu", "us"])).await {
            Err(Error::RecognitionFailed { detail }) => assert_eq!(detail, "us failed"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        fn fake_alpr(dir: &TempDir, body: &str) -> String {
            let path = dir.path().join("alpr");
            fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path.to_string_lossy().into_owned()
        }

        fn alpr(bin: String, top_n: Option<u32>, timeout: Duration) -> Alpr {
            Alpr { bin, top_n, timeout }
        }

        #[tokio::test]
        async fn passes_arguments_and_parses_stdout() {
            let dir = tempfile::tempdir().unwrap();
            let bin = fake_alpr(
                &dir,
                r#"printf '{"results":[{"plate":"ABC123","confidence":90.5}],"args":"%s"}' "$*""#,
            );
            let image = dir.path().join("car.jpg");
            let result = alpr(bin, Some(3), Duration::from_secs(10))
                .recognize(&image, "eu")
                .await
                .unwrap();
            assert_eq!(result.results, vec![Detection::new("ABC123", 90.5)]);
            assert_eq!(
                result.raw["args"],
                json!(format!("-j -c eu -n 3 {}", image.display()))
            );
        }

        #[tokio::test]
        async fn non_zero_exit_reports_stderr() {
            let dir = tempfile::tempdir().unwrap();
            let bin = fake_alpr(&dir, "echo partial\necho 'unknown country code' >&2\nexit 3");
            match alpr(bin, None, Duration::from_secs(10))
                .recognize(Path::new("car.jpg"), "zz")
                .await
            {
                Err(Error::RecognitionFailed { detail }) => assert_eq!(detail, "unknown country code"),
                other => panic!("unexpected {:?}", other),
            }
        }

        #[tokio::test]
        async fn non_zero_exit_falls_back_to_stdout() {
            let dir = tempfile::tempdir().unwrap();
            let bin = fake_alpr(&dir, "echo 'missing runtime data'\nexit 1");
            match alpr(bin, None, Duration::from_secs(10))
                .recognize(Path::new("car.jpg"), "us")
                .await
            {
                Err(Error::RecognitionFailed { detail }) => assert_eq!(detail, "missing runtime data"),
                other => panic!("unexpected {:?}", other),
            }
        }

        #[tokio::test]
        async fn garbage_stdout_is_wrapped() {
            let dir = tempfile::tempdir().unwrap();
            let bin = fake_alpr(&dir, "echo 'plate0: 1 results'");
            let result = alpr(bin, None, Duration::from_secs(10))
                .recognize(Path::new("car.jpg"), "us")
                .await
                .unwrap();
            assert!(result.results.is_empty());
            assert_eq!(result.raw, json!({"raw": "plate0: 1 results\n"}));
        }

        #[tokio::test]
        async fn times_out() {
            let dir = tempfile::tempdir().unwrap();
            let bin = fake_alpr(&dir, "sleep 5");
            match alpr(bin, None, Duration::from_millis(200))
                .recognize(Path::new("car.jpg"), "us")
                .await
            {
                Err(Error::RecognitionFailed { detail }) => assert!(detail.contains("timed out")),
                other => panic!("unexpected {:?}", other),
            }
        }

        #[tokio::test]
        async fn missing_binary() {
            let dir = tempfile::tempdir().unwrap();
            let bin = dir.path().join("no-alpr").to_string_lossy().into_owned();
            match alpr(bin, None, Duration::from_secs(1))
                .recognize(Path::new("car.jpg"), "us")
                .await
            {
                Err(Error::RecognitionFailed { detail }) => assert!(detail.starts_with("unable to run")),
                other => panic!("unexpected {:?}", other),
            }
        }
    }
}
