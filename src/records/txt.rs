//! TXT record data: chunking, service config encoding and decoding.

/// Attribute prefix marking a TXT record as carrying a service config.
pub const SERVICE_CONFIG_PREFIX: &str = "grpc_config=";

/// Maximum length of a single character-string within a TXT record.
pub const MAX_TXT_STRING_LEN: usize = 255;

/// Errors encountered while encoding a service config as TXT data.
#[derive(Debug, thiserror::Error)]
pub enum TxtError {
    /// The service config is not valid JSON.
    #[error("service config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Zone file parser the TXT data is destined for. Parsers disagree on how
/// inner quotation marks must be written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ZoneFileFormat {
    /// `gcloud dns` transaction files: quotes and backslashes escaped twice.
    Gcloud,
    /// BIND 9 zone files: inner quotes escaped once.
    Bind9,
    /// Parsers taking the raw string, inner quotes unescaped.
    #[default]
    #[value(name = "twisted")]
    Plain,
}

impl ZoneFileFormat {
    fn escapes_quotes(self) -> bool {
        matches!(self, Self::Gcloud | Self::Bind9)
    }
}

/// Splits TXT data into consecutive character-strings of at most
/// [`MAX_TXT_STRING_LEN`] bytes.
pub fn split_txt_data(data: &[u8]) -> Vec<Vec<u8>> {
    data.chunks(MAX_TXT_STRING_LEN).map(<[u8]>::to_vec).collect()
}

/// Drops the whitespace between JSON tokens, keeping keys in document order.
fn minify_json(json: &str) -> Result<String, serde_json::Error> {
    serde_json::from_str::<serde::de::IgnoredAny>(json)?;
    let mut out = String::with_capacity(json.len());
    let (mut in_string, mut escaped) = (false, false);
    for c in json.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            out.push(c);
        } else if !matches!(c, ' ' | '\t' | '\n' | '\r') {
            in_string = c == '"';
            out.push(c);
        }
    }
    Ok(out)
}

/// Encodes a service config JSON document as the character-strings of a
/// single TXT record, formatted for a particular zone file parser.
///
/// ```
/// use resolver_testbed::records::txt::{service_config_txt_data, ZoneFileFormat};
/// let chunks = service_config_txt_data(r#"[ {"serviceConfig": {}} ]"#, ZoneFileFormat::Bind9)?;
/// assert_eq!(chunks, vec![r#""grpc_config=[{\"serviceConfig\":{}}]""#]);
/// # Ok::<(), resolver_testbed::records::txt::TxtError>(())
/// ```
pub fn service_config_txt_data(json: &str, format: ZoneFileFormat) -> Result<Vec<String>, TxtError> {
    let minified = minify_json(json)?;
    let chunks = escaped_chunks(
        &format!("{SERVICE_CONFIG_PREFIX}{minified}"),
        format.escapes_quotes(),
    );

    Ok(chunks
        .into_iter()
        .map(|chunk| match format {
            // The outer quotes and extra backslashes don't count towards the limit
            ZoneFileFormat::Gcloud => format!("\"{}\"", chunk.replace("\\\"", "\\\\\\\"")),
            ZoneFileFormat::Bind9 => format!("\"{chunk}\""),
            ZoneFileFormat::Plain => chunk,
        })
        .collect())
}

/// Splits `data` into strings of at most [`MAX_TXT_STRING_LEN`] bytes,
/// escaping inner quotes first if asked to.
fn escaped_chunks(data: &str, escape_quotes: bool) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut chunk = String::new();
    for c in data.chars() {
        let piece = if c == '"' && escape_quotes {
            "\\\"".to_string()
        } else {
            c.to_string()
        };
        // An escape sequence is never split across two strings
        if chunk.len() + piece.len() > MAX_TXT_STRING_LEN {
            chunks.push(std::mem::take(&mut chunk));
        }
        chunk.push_str(&piece);
    }
    if !chunk.is_empty() {
        chunks.push(chunk);
    }
    chunks
}

/// Character-strings a cloud zone serves for TXT `data` uploaded by the
/// `gcloud` commands of [`crate::gen`].
///
/// Service config escapes count towards the string length limit there, so
/// those strings end earlier than [`split_txt_data`] would end them.
pub fn gcloud_served_txt_chunks(data: &str) -> Result<Vec<Vec<u8>>, TxtError> {
    let Some(json) = data.strip_prefix(SERVICE_CONFIG_PREFIX) else {
        return Ok(split_txt_data(data.as_bytes()));
    };
    let minified = minify_json(json)?;
    Ok(escaped_chunks(&format!("{SERVICE_CONFIG_PREFIX}{minified}"), true)
        .into_iter()
        .map(|chunk| chunk.replace("\\\"", "\"").into_bytes())
        .collect())
}

/// Renders TXT character-strings as a parenthesized zone file value.
pub fn render_zone_file_txt(chunks: &[String]) -> String {
    let mut out = String::from("(\n");
    for chunk in chunks {
        out.push_str("    ");
        out.push_str(chunk);
        out.push('\n');
    }
    out.push(')');
    out
}

/// Extracts a service config from the TXT records found at a name.
///
/// The first record whose first character-string starts with
/// [`SERVICE_CONFIG_PREFIX`] wins; its strings are concatenated and the
/// prefix removed. Other records are ignored.
pub fn join_service_config(records: &[Vec<Vec<u8>>]) -> Option<String> {
    let record = records.iter().find(|strings| {
        strings
            .first()
            .is_some_and(|first| first.starts_with(SERVICE_CONFIG_PREFIX.as_bytes()))
    })?;
    let joined: Vec<u8> = record.concat();
    Some(String::from_utf8_lossy(&joined[SERVICE_CONFIG_PREFIX.len()..]).into_owned())
}
