//! Mail delivery driver
//!
//! Reaches the device through its personal-document mail address: each
//! copy action becomes one message with the book attached. The device
//! state is unknowable over this transport, so enumeration is always
//! empty and the orchestrator seeds the device view from history.
//!
//! Attachment names survive non-ASCII titles by carrying both a
//! slugged `filename=` and the real name in RFC-8187
//! `filename*N*=UTF-8''...` continuation parameters, capped at 74
//! characters per token.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lettre::message::header::{ContentType, Header, HeaderName, HeaderValue};
use lettre::message::{Mailbox, Message, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{SmtpTransport, Transport};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use quillsync_core::config::SmtpConfig;
use quillsync_core::ports::Driver;
use quillsync_core::{ObjectInfo, ObjectSet};

const DRIVER_NAME: &str = "e-mail";
const SAFE_TOKEN_LENGTH: usize = 74;
const RFC8187_CHARSET: &str = "UTF-8''";

/// Formats the device accepts by mail, with their MIME types.
const MAIL_FORMATS: &[(&str, &str)] = &[
    (".doc", "application/msword"),
    (".docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
    (".html", "text/html"),
    (".htm", "text/html"),
    (".rtf", "application/rtf"),
    (".txt", "text/plain"),
    (".jpeg", "image/jpeg"),
    (".jpg", "image/jpeg"),
    (".gif", "image/gif"),
    (".png", "image/png"),
    (".bmp", "image/bmp"),
    (".pdf", "application/pdf"),
    (".epub", "application/epub+zip"),
];

/// MIME type for a book extension (leading dot, any case).
pub fn mail_content_type(ext: &str) -> &'static str {
    let ext = ext.to_lowercase();
    MAIL_FORMATS
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| *mime)
        .unwrap_or("application/octet-stream")
}

/// Whether the device will accept this extension by mail.
pub fn is_supported_mail_format(ext: &str) -> bool {
    let ext = ext.to_lowercase();
    MAIL_FORMATS.iter().any(|(e, _)| *e == ext)
}

pub struct MailDriver {
    target: String,
    smtp: SmtpConfig,
    /// When set, every message is also written here as an `.eml` file.
    capture_dir: Option<PathBuf>,
}

impl MailDriver {
    pub fn connect(target: &str, smtp: &SmtpConfig, capture_dir: Option<PathBuf>) -> Self {
        Self {
            target: target.to_string(),
            smtp: smtp.clone(),
            capture_dir,
        }
    }

    /// One message per book: subject names the original file, the
    /// attachment carries a transport-safe name plus the real one.
    fn build_message(&self, source_path: &str) -> anyhow::Result<Message> {
        let path = Path::new(source_path);
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let real_name = format!("{stem}{ext}");
        let safe_name = format!("{}{ext}", slug::slugify(&stem));

        let from: Mailbox = format!("quillsync <{}>", self.smtp.from).parse()?;
        let to: Mailbox = format!("kindle device <{}>", self.target).parse()?;

        let body = std::fs::read(path)?;
        let attachment = SinglePart::builder()
            .header(ContentType::parse(&format!(
                "{}; name=\"{safe_name}\"",
                mail_content_type(&ext)
            ))?)
            .header(RawContentDisposition(format!(
                "attachment; {}",
                content_disposition_filename(&safe_name, &real_name)
            )))
            .body(body);

        Ok(Message::builder()
            .from(from)
            .to(to)
            .subject(format!("Sync to Kindle: {real_name}"))
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(
                        "This email has been sent by quillsync".to_string(),
                    ))
                    .singlepart(attachment),
            )?)
    }
}

#[async_trait]
impl Driver for MailDriver {
    fn name(&self) -> &'static str {
        DRIVER_NAME
    }

    /// The sender address stands in for a hardware serial.
    fn unique_id(&self) -> String {
        self.smtp.from.clone()
    }

    /// Always empty - the mail transport has no view into the device.
    async fn enumerate(&self) -> anyhow::Result<ObjectSet> {
        Ok(ObjectSet::new())
    }

    async fn mkdir(&self, _obj: &ObjectInfo) -> anyhow::Result<()> {
        tracing::error!(actor = DRIVER_NAME, "Action MkDir is not supported");
        Ok(())
    }

    async fn remove(&self, _obj: &ObjectInfo) -> anyhow::Result<()> {
        tracing::error!(actor = DRIVER_NAME, "Action Remove is not supported");
        Ok(())
    }

    async fn copy(&self, obj: &ObjectInfo) -> anyhow::Result<()> {
        let message = self.build_message(&obj.object_name)?;

        if let Some(dir) = &self.capture_dir {
            let stem = Path::new(&obj.object_name)
                .file_stem()
                .map(|s| slug::slugify(s.to_string_lossy()))
                .unwrap_or_else(|| "message".to_string());
            std::fs::write(dir.join(format!("{stem}.eml")), message.formatted())?;
        }

        let transport = SmtpTransport::starttls_relay(&self.smtp.server)?
            .port(self.smtp.port)
            .credentials(Credentials::new(
                self.smtp.user.clone(),
                self.smtp.password.expose().to_string(),
            ))
            .build();
        transport
            .send(&message)
            .map_err(|e| anyhow::anyhow!("unable to send e-mail: {e}"))?;
        Ok(())
    }

    async fn disconnect(&self) {
        // nothing to release
    }
}

// ---------------------------------------------------------------------------
// RFC 8187 parameter continuation
// ---------------------------------------------------------------------------

// Everything outside attr-char gets percent-escaped.
const ATTR_CHAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// Splits the encoded name into tokens no longer than the safe length,
/// never breaking inside one character's escape sequence. The first
/// token carries the charset prefix.
fn encode_parts(real_name: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut part = RFC8187_CHARSET.to_string();
    let mut buf = [0u8; 4];
    for sym in real_name.chars() {
        let encoded = utf8_percent_encode(sym.encode_utf8(&mut buf), ATTR_CHAR).to_string();
        if part.len() + encoded.len() > SAFE_TOKEN_LENGTH {
            parts.push(part);
            part = encoded;
            continue;
        }
        part.push_str(&encoded);
    }
    parts.push(part);
    parts
}

/// `filename="safe"; filename*0*=UTF-8''...; filename*1*=...`
fn content_disposition_filename(safe_name: &str, real_name: &str) -> String {
    let mut result = format!("filename=\"{safe_name}\"");
    for (i, part) in encode_parts(real_name).iter().enumerate() {
        result.push_str(&format!("; filename*{i}*={part}"));
    }
    result
}

/// Content-Disposition with a pre-rendered value; the stock lettre
/// header cannot carry parameter continuations.
#[derive(Debug, Clone)]
struct RawContentDisposition(String);

impl Header for RawContentDisposition {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("Content-Disposition")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}
