use std::fmt::Write;

const BOUNDARY: &str = "NextPart";
const BASE64_LINE: usize = 76;

/// Base64 encoded file carried by an attachment email.
#[derive(Clone, Debug, PartialEq)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: &'static str,
    pub encoded: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Content {
    Text(String),
    /// Plain text with an HTML alternative
    Alternative { text: String, html: String },
    /// HTML intro followed by one attachment
    Attachment { intro_html: String, attachment: Attachment },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Email {
    pub from: String,
    pub reply_to: Option<String>,
    pub to: Vec<String>,
    pub subject: String,
    pub content: Content,
}

impl Email {
    /// Renders the message as raw MIME, ready for a mail relay.
    pub fn to_mime(&self) -> String {
        let mut out = String::new();
        header(&mut out, "From", &self.from);
        if let Some(reply_to) = &self.reply_to {
            header(&mut out, "Reply-To", reply_to);
        }
        header(&mut out, "To", &self.to.join(", "));
        header(&mut out, "Subject", &self.subject);
        header(&mut out, "MIME-Version", "1.0");

        match &self.content {
            Content::Text(text) => {
                header(&mut out, "Content-Type", "text/plain; charset=utf-8");
                out.push_str("\r\n");
                out.push_str(text);
                out.push_str("\r\n");
            }
            Content::Alternative { text, html } => {
                header(
                    &mut out,
                    "Content-Type",
                    &format!("multipart/alternative; boundary=\"{BOUNDARY}\""),
                );
                out.push_str("\r\n");
                part(&mut out, "text/plain; charset=utf-8", text);
                part(&mut out, "text/html; charset=utf-8", html);
                let _ = write!(out, "--{BOUNDARY}--\r\n");
            }
            Content::Attachment {
                intro_html,
                attachment,
            } => {
                header(
                    &mut out,
                    "Content-Type",
                    &format!("multipart/mixed; boundary=\"{BOUNDARY}\""),
                );
                out.push_str("\r\n");
                part(&mut out, "text/html; charset=us-ascii", intro_html);

                let name = &attachment.file_name;
                let _ = write!(out, "--{BOUNDARY}\r\n");
                header(
                    &mut out,
                    "Content-Type",
                    &format!("{}; name=\"{name}\"", attachment.content_type),
                );
                header(&mut out, "Content-Description", name);
                header(
                    &mut out,
                    "Content-Disposition",
                    &format!("attachment; filename=\"{name}\""),
                );
                header(&mut out, "Content-Transfer-Encoding", "base64");
                out.push_str("\r\n");
                for line in wrap(&attachment.encoded) {
                    out.push_str(line);
                    out.push_str("\r\n");
                }
                out.push_str("\r\n");
                let _ = write!(out, "--{BOUNDARY}--\r\n");
            }
        }

        out
    }
}

fn header(out: &mut String, name: &str, value: &str) {
    // Header values never span lines
    let value = value.replace(['\r', '\n'], " ");
    let _ = write!(out, "{name}: {value}\r\n");
}

fn part(out: &mut String, content_type: &str, body: &str) {
    let _ = write!(out, "--{BOUNDARY}\r\n");
    header(out, "Content-Type", content_type);
    out.push_str("\r\n");
    out.push_str(body);
    out.push_str("\r\n");
}

/// Splits base64 text into lines of at most 76 characters.
fn wrap(encoded: &str) -> impl Iterator<Item = &str> {
    // Base64 output is ASCII, so byte offsets are char boundaries
    (0..encoded.len())
        .step_by(BASE64_LINE)
        .map(move |start| &encoded[start..(start + BASE64_LINE).min(encoded.len())])
}
