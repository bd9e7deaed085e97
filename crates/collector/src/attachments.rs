//! Attachment materialization
//!
//! Copies path-sourced attachments and decodes inline traces into
//! `<output>/attachments/` under collision-free names. Names are made unique
//! per write (timestamp + random token, opened with create-new) so concurrent
//! writers never coordinate. A failure degrades the one record it concerns.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use playreport_common::{AttachmentKind, AttachmentRecord, ATTACHMENTS_DIR};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, warn};

use crate::error::{CollectorError, CollectorResult};
use crate::input::{BodyBytes, RawAttachment};

const MAX_NAME_ATTEMPTS: usize = 5;
const TOKEN_LEN: usize = 8;

/// Classify an attachment from its name and content type.
///
/// Precedence is video, then screenshot, then trace.
pub fn classify(name: &str, content_type: &str) -> AttachmentKind {
    if name.contains("video") || content_type.starts_with("video/") {
        return AttachmentKind::Video;
    }
    if name.contains("screenshot") || content_type.starts_with("image/") {
        return AttachmentKind::Screenshot;
    }
    if name.contains("trace")
        || name.ends_with(".zip")
        || content_type.contains("application/zip")
        || content_type.contains("trace")
    {
        return AttachmentKind::Trace;
    }
    AttachmentKind::Other
}

/// Writes attachment payloads below an output directory
#[derive(Debug, Clone)]
pub struct AttachmentMaterializer {
    output_dir: PathBuf,
    attachments_dir: PathBuf,
}

impl AttachmentMaterializer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        let output_dir = output_dir.into();
        let attachments_dir = output_dir.join(ATTACHMENTS_DIR);
        Self {
            output_dir,
            attachments_dir,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn attachments_dir(&self) -> &Path {
        &self.attachments_dir
    }

    /// Turn a raw descriptor into a record. Never fails; a write error leaves
    /// the record with its inline body (if any) and logs a warning.
    pub fn materialize(&self, raw: RawAttachment, attempt: u32) -> AttachmentRecord {
        let kind = classify(&raw.name, &raw.content_type);
        let RawAttachment {
            name,
            content_type,
            path,
            body,
        } = raw;

        let mut record = AttachmentRecord {
            name,
            content_type,
            kind,
            attempt,
            path: None,
            body: None,
        };

        if let Some(source) = path {
            match self.copy_file(&source) {
                Ok(relative) => {
                    debug!("Copied attachment {} -> {}", source.display(), relative);
                    record.path = Some(relative);
                }
                Err(e) => {
                    warn!("Failed to copy attachment {}: {}", source.display(), e);
                    record.body = body.map(BodyBytes::into_inline);
                }
            }
            return record;
        }

        match body {
            Some(body) if kind == AttachmentKind::Trace => match self.write_trace(&record.name, &body) {
                Ok(relative) => {
                    debug!("Wrote inline trace '{}' -> {}", record.name, relative);
                    record.path = Some(relative);
                }
                Err(e) => {
                    warn!("Failed to write trace '{}', keeping it inline: {}", record.name, e);
                    record.body = Some(body.into_inline());
                }
            },
            Some(body) => record.body = Some(body.into_inline()),
            None => {}
        }

        record
    }

    fn copy_file(&self, source: &Path) -> CollectorResult<String> {
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut input = File::open(source)?;
        let (mut output, dest, relative) = self.create_unique(&file_name, None)?;

        if let Err(e) = io::copy(&mut input, &mut output) {
            let _ = fs::remove_file(&dest);
            return Err(e.into());
        }
        Ok(relative)
    }

    fn write_trace(&self, name: &str, body: &BodyBytes) -> CollectorResult<String> {
        let bytes = body.decode()?;
        let (mut output, dest, relative) = self.create_unique(name, Some("zip"))?;

        if let Err(e) = output.write_all(&bytes) {
            let _ = fs::remove_file(&dest);
            return Err(e.into());
        }
        Ok(relative)
    }

    /// Create a fresh file under `attachments/`, returning the handle, its
    /// absolute path and its path relative to the output directory.
    fn create_unique(
        &self,
        file_name: &str,
        force_ext: Option<&str>,
    ) -> CollectorResult<(File, PathBuf, String)> {
        fs::create_dir_all(&self.attachments_dir)?;

        let (stem, ext) = split_name(file_name);
        let ext = force_ext.map(str::to_string).or(ext);

        let candidates = (0..MAX_NAME_ATTEMPTS).map(|_| unique_name(&stem, ext.as_deref()));
        open_first_free(&self.attachments_dir, file_name, candidates)
    }
}

/// Open the first candidate name that does not exist yet in `dir`
fn open_first_free(
    dir: &Path,
    file_name: &str,
    candidates: impl IntoIterator<Item = String>,
) -> CollectorResult<(File, PathBuf, String)> {
    for candidate in candidates {
        let dest = dir.join(&candidate);
        match OpenOptions::new().write(true).create_new(true).open(&dest) {
            Ok(file) => return Ok((file, dest, format!("{}/{}", ATTACHMENTS_DIR, candidate))),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Err(CollectorError::NameExhausted(file_name.to_string()))
}

fn unique_name(stem: &str, ext: Option<&str>) -> String {
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect();
    let millis = Utc::now().timestamp_millis();

    match ext {
        Some(ext) => format!("{}-{}-{}.{}", stem, millis, token, ext),
        None => format!("{}-{}-{}", stem, millis, token),
    }
}

/// Split a file name into a sanitized stem and extension
fn split_name(file_name: &str) -> (String, Option<String>) {
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| sanitize(&s.to_string_lossy()))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "attachment".to_string());
    let ext = path
        .extension()
        .map(|e| sanitize(&e.to_string_lossy()))
        .filter(|e| !e.is_empty());
    (stem, ext)
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use playreport_common::InlineBody;
    use tempfile::TempDir;
    use test_case::test_case;

    #[test_case("video", "video/webm", AttachmentKind::Video ; "video by name and type")]
    #[test_case("recording", "video/mp4", AttachmentKind::Video ; "video by type")]
    #[test_case("screenshot-video", "image/png", AttachmentKind::Video ; "video wins over screenshot")]
    #[test_case("screenshot", "application/octet-stream", AttachmentKind::Screenshot ; "screenshot by name")]
    #[test_case("diff", "image/png", AttachmentKind::Screenshot ; "screenshot by type")]
    #[test_case("trace", "application/octet-stream", AttachmentKind::Trace ; "trace by name")]
    #[test_case("bundle.zip", "application/octet-stream", AttachmentKind::Trace ; "trace by zip name")]
    #[test_case("bundle", "application/zip", AttachmentKind::Trace ; "trace by zip type")]
    #[test_case("log", "text/plain", AttachmentKind::Other ; "other")]
    fn test_classify(name: &str, content_type: &str, expected: AttachmentKind) {
        assert_eq!(classify(name, content_type), expected);
    }

    #[test]
    fn test_path_attachment_round_trip() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("page-shot.png");
        fs::write(&source, b"\x89PNG fake image bytes").unwrap();

        let out = tmp.path().join("report");
        let materializer = AttachmentMaterializer::new(&out);
        let record = materializer.materialize(
            RawAttachment::from_path("screenshot", "image/png", &source),
            0,
        );

        let relative = record.path.clone().expect("attachment should be copied");
        assert!(relative.starts_with("attachments/page-shot-"));
        assert!(relative.ends_with(".png"));
        assert_eq!(record.kind, AttachmentKind::Screenshot);
        assert!(record.body.is_none());
        assert_eq!(fs::read(out.join(&relative)).unwrap(), fs::read(&source).unwrap());
    }

    #[test]
    fn test_identical_names_do_not_collide() {
        let tmp = TempDir::new().unwrap();
        let first = tmp.path().join("a").join("trace.zip");
        let second = tmp.path().join("b").join("trace.zip");
        fs::create_dir_all(first.parent().unwrap()).unwrap();
        fs::create_dir_all(second.parent().unwrap()).unwrap();
        fs::write(&first, b"first").unwrap();
        fs::write(&second, b"second").unwrap();

        let out = tmp.path().join("report");
        let materializer = AttachmentMaterializer::new(&out);
        let a = materializer.materialize(RawAttachment::from_path("trace", "application/zip", &first), 0);
        let b = materializer.materialize(RawAttachment::from_path("trace", "application/zip", &second), 1);

        let (pa, pb) = (a.path.unwrap(), b.path.unwrap());
        assert_ne!(pa, pb);
        assert_eq!(fs::read(out.join(pa)).unwrap(), b"first");
        assert_eq!(fs::read(out.join(pb)).unwrap(), b"second");
        assert_eq!(fs::read_dir(materializer.attachments_dir()).unwrap().count(), 2);
    }

    #[test]
    fn test_missing_source_degrades_record() {
        let tmp = TempDir::new().unwrap();
        let materializer = AttachmentMaterializer::new(tmp.path());
        let mut raw = RawAttachment::from_path("stdout", "text/plain", tmp.path().join("gone.txt"));
        raw.body = Some(BodyBytes::Text("fallback".into()));

        let record = materializer.materialize(raw, 0);
        assert!(record.path.is_none());
        assert_eq!(record.body, Some(InlineBody::Utf8("fallback".into())));
    }

    #[test]
    fn test_missing_source_without_body_keeps_bare_record() {
        let tmp = TempDir::new().unwrap();
        let materializer = AttachmentMaterializer::new(tmp.path());
        let record = materializer.materialize(
            RawAttachment::from_path("video", "video/webm", tmp.path().join("gone.webm")),
            1,
        );

        assert!(record.path.is_none() && record.body.is_none());
        assert_eq!(record.name, "video");
        assert_eq!(record.kind, AttachmentKind::Video);
        assert_eq!(record.attempt, 1);
        assert!(!materializer.attachments_dir().exists());
    }

    #[test]
    fn test_taken_names_exhaust_candidates() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("taken.png"), b"existing").unwrap();

        let result = open_first_free(tmp.path(), "shot.png", vec!["taken.png".to_string(); MAX_NAME_ATTEMPTS]);
        match result {
            Err(CollectorError::NameExhausted(name)) => assert_eq!(name, "shot.png"),
            other => panic!("expected name exhaustion, got {:?}", other.map(|(_, dest, _)| dest)),
        }
        assert_eq!(fs::read(tmp.path().join("taken.png")).unwrap(), b"existing");
    }

    #[test]
    fn test_taken_name_is_skipped() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("taken.png"), b"existing").unwrap();

        let (_, dest, relative) =
            open_first_free(tmp.path(), "shot.png", ["taken.png".to_string(), "free.png".to_string()]).unwrap();
        assert_eq!(relative, "attachments/free.png");
        assert_eq!(dest, tmp.path().join("free.png"));
        assert_eq!(fs::read(tmp.path().join("taken.png")).unwrap(), b"existing");
    }

    #[test]
    fn test_inline_trace_written_as_zip() {
        let tmp = TempDir::new().unwrap();
        let materializer = AttachmentMaterializer::new(tmp.path());
        let record = materializer.materialize(
            RawAttachment::from_body("trace", "application/zip", BodyBytes::Base64("UEsDBA==".into())),
            2,
        );

        let relative = record.path.expect("trace should be materialized");
        assert!(relative.starts_with("attachments/trace-"));
        assert!(relative.ends_with(".zip"));
        assert!(record.body.is_none());
        assert_eq!(record.attempt, 2);
        assert_eq!(fs::read(tmp.path().join(relative)).unwrap(), b"PK\x03\x04");
    }

    #[test]
    fn test_undecodable_trace_stays_inline() {
        let tmp = TempDir::new().unwrap();
        let materializer = AttachmentMaterializer::new(tmp.path());
        let record = materializer.materialize(
            RawAttachment::from_body("trace", "application/zip", BodyBytes::Base64("not base64!".into())),
            0,
        );

        assert!(record.path.is_none());
        assert_eq!(record.body, Some(InlineBody::Base64("not base64!".into())));
        let written = fs::read_dir(materializer.attachments_dir())
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(written, 0);
    }

    #[test]
    fn test_inline_non_trace_is_not_written() {
        let tmp = TempDir::new().unwrap();
        let materializer = AttachmentMaterializer::new(tmp.path());
        let record = materializer.materialize(
            RawAttachment::from_body("console", "text/plain", BodyBytes::Raw(b"ok".to_vec())),
            0,
        );

        assert_eq!(record.kind, AttachmentKind::Other);
        assert_eq!(record.body, Some(InlineBody::Utf8("ok".into())));
        assert!(!materializer.attachments_dir().exists());
    }

    #[test]
    fn test_split_name_sanitizes() {
        assert_eq!(split_name("my shot.png"), ("my_shot".to_string(), Some("png".to_string())));
        assert_eq!(split_name(""), ("attachment".to_string(), None));
    }
}
