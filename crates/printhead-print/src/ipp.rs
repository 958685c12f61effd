// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// IPP binary message codec (RFC 8010 SS3).
//
// ```text
// version-number:  2 bytes (major, minor)
// operation-id / status-code: 2 bytes (big-endian)
// request-id:      4 bytes (big-endian)
// attribute-groups:
//   delimiter-tag: 1 byte (0x00..=0x0F)
//   attributes:
//     value-tag:    1 byte
//     name-length:  2 bytes, name
//     value-length: 2 bytes, value
// end-of-attributes-tag: 1 byte (0x03)
// document-data: remainder
// ```
//
// An attribute with an empty name is an additional value of the attribute
// before it.  Collections are carried as flat attribute sequences
// (begCollection, memberAttrName, value..., endCollection).

use printhead_core::error::{PrintheadError, Result};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

// -- Delimiter tags --

pub const TAG_OPERATION_ATTRIBUTES: u8 = 0x01;
pub const TAG_JOB_ATTRIBUTES: u8 = 0x02;
pub const TAG_END_OF_ATTRIBUTES: u8 = 0x03;
pub const TAG_PRINTER_ATTRIBUTES: u8 = 0x04;

// -- Value tags --

pub const VALUE_TAG_INTEGER: u8 = 0x21;
pub const VALUE_TAG_BOOLEAN: u8 = 0x22;
pub const VALUE_TAG_ENUM: u8 = 0x23;
pub const VALUE_TAG_BEGIN_COLLECTION: u8 = 0x34;
pub const VALUE_TAG_END_COLLECTION: u8 = 0x37;
pub const VALUE_TAG_TEXT: u8 = 0x41;
pub const VALUE_TAG_NAME: u8 = 0x42;
pub const VALUE_TAG_KEYWORD: u8 = 0x44;
pub const VALUE_TAG_URI: u8 = 0x45;
pub const VALUE_TAG_CHARSET: u8 = 0x47;
pub const VALUE_TAG_NATURAL_LANGUAGE: u8 = 0x48;
pub const VALUE_TAG_MIME_TYPE: u8 = 0x49;
pub const VALUE_TAG_MEMBER_NAME: u8 = 0x4A;

// -- Operations --

pub const OP_PRINT_JOB: u16 = 0x0002;
pub const OP_VALIDATE_JOB: u16 = 0x0004;
pub const OP_GET_JOB_ATTRIBUTES: u16 = 0x0009;
pub const OP_GET_PRINTER_ATTRIBUTES: u16 = 0x000B;

// -- Status codes --

pub const STATUS_OK: u16 = 0x0000;
pub const STATUS_CLIENT_ERROR_BAD_REQUEST: u16 = 0x0400;
pub const STATUS_SERVER_ERROR_INTERNAL: u16 = 0x0500;
pub const STATUS_SERVER_ERROR_OPERATION_NOT_SUPPORTED: u16 = 0x0501;

// -- Enum values --

pub const JOB_STATE_PROCESSING: i32 = 5;
pub const JOB_STATE_ABORTED: i32 = 8;
pub const JOB_STATE_COMPLETED: i32 = 9;
pub const PRINTER_STATE_IDLE: i32 = 3;

/// Bytes before the first attribute group.
pub const HEADER_LEN: usize = 8;

// ---------------------------------------------------------------------------
// Message model
// ---------------------------------------------------------------------------

/// A single `(value_tag, name, value)` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IppAttribute {
    pub value_tag: u8,
    /// Empty for an additional value of the previous attribute.
    pub name: String,
    pub value: Vec<u8>,
}

/// Attributes between two delimiter tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IppAttributeGroup {
    /// The delimiter tag for this group (0x01, 0x02, 0x04, etc.)
    pub tag: u8,
    pub attributes: Vec<IppAttribute>,
}

impl IppAttributeGroup {
    /// First attribute with the given name.
    pub fn get(&self, name: &str) -> Option<&IppAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn get_string(&self, name: &str) -> Option<String> {
        self.get(name)
            .and_then(|a| String::from_utf8(a.value.clone()).ok())
    }

    /// First attribute with the given name and value tag, read as a
    /// big-endian i32.
    pub fn get_integer(&self, name: &str, value_tag: u8) -> Option<i32> {
        self.attributes
            .iter()
            .find(|a| a.name == name && a.value_tag == value_tag)
            .and_then(|a| <[u8; 4]>::try_from(a.value.as_slice()).ok())
            .map(i32::from_be_bytes)
    }
}

/// A decoded IPP request or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IppMessage {
    pub version_major: u8,
    pub version_minor: u8,
    /// Operation id in a request, status code in a response.
    pub operation_or_status: u16,
    pub request_id: u32,
    pub groups: Vec<IppAttributeGroup>,
    /// Whether the end-of-attributes tag was present.
    pub terminated: bool,
    /// Everything after the end-of-attributes tag.
    pub document: Vec<u8>,
}

impl IppMessage {
    /// First group with the given delimiter tag.
    pub fn group(&self, tag: u8) -> Option<&IppAttributeGroup> {
        self.groups.iter().find(|g| g.tag == tag)
    }

    pub fn operation_attributes(&self) -> Option<&IppAttributeGroup> {
        self.group(TAG_OPERATION_ATTRIBUTES)
    }

    /// Decode only the 8-byte header, leaving groups and document empty.
    ///
    /// Lets an error response echo the version and request id of a body
    /// whose attributes fail to decode.
    pub fn decode_header(data: &[u8]) -> Option<Self> {
        let header = data.get(..HEADER_LEN)?;
        Some(IppMessage {
            version_major: header[0],
            version_minor: header[1],
            operation_or_status: u16::from_be_bytes([header[2], header[3]]),
            request_id: u32::from_be_bytes([header[4], header[5], header[6], header[7]]),
            groups: Vec::new(),
            terminated: false,
            document: Vec::new(),
        })
    }

    /// Decode a message body, scanning the attribute groups up to the
    /// end-of-attributes tag.  Everything after the tag is the document.
    ///
    /// Fails if the header is short or an attribute runs past the end of the
    /// data.  A body that ends without the end-of-attributes tag decodes
    /// with `terminated == false`.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut message = Self::decode_header(data).ok_or_else(|| {
            malformed(format!(
                "IPP message too short: {} bytes (minimum {HEADER_LEN})",
                data.len()
            ))
        })?;

        let mut pos = HEADER_LEN;
        let mut current: Option<IppAttributeGroup> = None;

        while pos < data.len() {
            let tag = data[pos];
            pos += 1;

            if tag <= 0x0F {
                if let Some(group) = current.take() {
                    message.groups.push(group);
                }
                if tag == TAG_END_OF_ATTRIBUTES {
                    message.terminated = true;
                    break;
                }
                current = Some(IppAttributeGroup {
                    tag,
                    attributes: Vec::new(),
                });
                continue;
            }

            let name = read_field(data, &mut pos, "name")?;
            let value = read_field(data, &mut pos, "value")?;
            let attribute = IppAttribute {
                value_tag: tag,
                name: String::from_utf8_lossy(name).into_owned(),
                value: value.to_vec(),
            };

            match current.as_mut() {
                Some(group) => group.attributes.push(attribute),
                None => {
                    return Err(malformed(format!(
                        "attribute '{}' outside of any group",
                        attribute.name
                    )));
                }
            }
        }

        if let Some(group) = current.take() {
            message.groups.push(group);
        }
        if message.terminated {
            message.document = data[pos..].to_vec();
        }
        Ok(message)
    }

    /// Encode the message, always writing the end-of-attributes tag.
    pub fn encode(&self) -> Vec<u8> {
        let attr_len: usize = self
            .groups
            .iter()
            .flat_map(|g| &g.attributes)
            .map(|a| 5 + a.name.len() + a.value.len())
            .sum();
        let mut buf =
            Vec::with_capacity(HEADER_LEN + self.groups.len() + attr_len + 1 + self.document.len());

        buf.push(self.version_major);
        buf.push(self.version_minor);
        buf.extend_from_slice(&self.operation_or_status.to_be_bytes());
        buf.extend_from_slice(&self.request_id.to_be_bytes());

        for group in &self.groups {
            buf.push(group.tag);
            for attr in &group.attributes {
                write_attr(&mut buf, attr.value_tag, attr.name.as_bytes(), &attr.value);
            }
        }
        buf.push(TAG_END_OF_ATTRIBUTES);
        buf.extend_from_slice(&self.document);
        buf
    }
}

/// IPP status code reported for a failed request.
pub fn status_for_error(err: &PrintheadError) -> u16 {
    match err {
        PrintheadError::MalformedMessage(_) => STATUS_CLIENT_ERROR_BAD_REQUEST,
        PrintheadError::UnsupportedOperation(_) => STATUS_SERVER_ERROR_OPERATION_NOT_SUPPORTED,
        _ => STATUS_SERVER_ERROR_INTERNAL,
    }
}

fn malformed(message: String) -> PrintheadError {
    PrintheadError::MalformedMessage(message)
}

/// Read a 2-byte length prefix and that many bytes.
fn read_field<'a>(data: &'a [u8], pos: &mut usize, what: &str) -> Result<&'a [u8]> {
    let len_bytes = data
        .get(*pos..*pos + 2)
        .ok_or_else(|| malformed(format!("truncated {what}-length field")))?;
    let len = usize::from(u16::from_be_bytes([len_bytes[0], len_bytes[1]]));
    *pos += 2;
    let field = data
        .get(*pos..*pos + len)
        .ok_or_else(|| malformed(format!("truncated attribute {what}")))?;
    *pos += len;
    Ok(field)
}

fn write_attr(buf: &mut Vec<u8>, value_tag: u8, name: &[u8], value: &[u8]) {
    let name = &name[..name.len().min(usize::from(u16::MAX))];
    let value = &value[..value.len().min(usize::from(u16::MAX))];
    buf.push(value_tag);
    buf.extend_from_slice(&(name.len() as u16).to_be_bytes());
    buf.extend_from_slice(name);
    buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
    buf.extend_from_slice(value);
}

// ---------------------------------------------------------------------------
// Response builder
// ---------------------------------------------------------------------------

/// Builder for IPP responses.
///
/// Attribute methods append to the most recently opened group.  Calling an
/// attribute method before any `begin_group` opens an operation-attributes
/// group.
pub struct IppResponseBuilder {
    message: IppMessage,
}

impl IppResponseBuilder {
    /// Start a response, echoing the request's version and id.
    pub fn new(version: (u8, u8), status: u16, request_id: u32) -> Self {
        Self {
            message: IppMessage {
                version_major: version.0,
                version_minor: version.1,
                operation_or_status: status,
                request_id,
                groups: Vec::new(),
                terminated: true,
                document: Vec::new(),
            },
        }
    }

    /// Start a response to `request`.
    pub fn reply_to(request: &IppMessage, status: u16) -> Self {
        Self::new(
            (request.version_major, request.version_minor),
            status,
            request.request_id,
        )
    }

    pub fn begin_group(&mut self, tag: u8) -> &mut Self {
        self.message.groups.push(IppAttributeGroup {
            tag,
            attributes: Vec::new(),
        });
        self
    }

    /// The standard operation-attributes group every response starts with.
    pub fn operation_attributes(&mut self) -> &mut Self {
        self.begin_group(TAG_OPERATION_ATTRIBUTES)
            .charset("attributes-charset", "utf-8")
            .natural_language("attributes-natural-language", "en")
    }

    pub fn text(&mut self, name: &str, value: &str) -> &mut Self {
        self.write_attr(VALUE_TAG_TEXT, name, value.as_bytes())
    }

    pub fn name_attr(&mut self, name: &str, value: &str) -> &mut Self {
        self.write_attr(VALUE_TAG_NAME, name, value.as_bytes())
    }

    pub fn keyword(&mut self, name: &str, value: &str) -> &mut Self {
        self.write_attr(VALUE_TAG_KEYWORD, name, value.as_bytes())
    }

    /// Additional keyword value for the previous attribute.
    pub fn keyword_additional(&mut self, value: &str) -> &mut Self {
        self.write_attr(VALUE_TAG_KEYWORD, "", value.as_bytes())
    }

    pub fn uri(&mut self, name: &str, value: &str) -> &mut Self {
        self.write_attr(VALUE_TAG_URI, name, value.as_bytes())
    }

    pub fn charset(&mut self, name: &str, value: &str) -> &mut Self {
        self.write_attr(VALUE_TAG_CHARSET, name, value.as_bytes())
    }

    pub fn natural_language(&mut self, name: &str, value: &str) -> &mut Self {
        self.write_attr(VALUE_TAG_NATURAL_LANGUAGE, name, value.as_bytes())
    }

    pub fn mime_type(&mut self, name: &str, value: &str) -> &mut Self {
        self.write_attr(VALUE_TAG_MIME_TYPE, name, value.as_bytes())
    }

    pub fn mime_type_additional(&mut self, value: &str) -> &mut Self {
        self.write_attr(VALUE_TAG_MIME_TYPE, "", value.as_bytes())
    }

    pub fn integer(&mut self, name: &str, value: i32) -> &mut Self {
        self.write_attr(VALUE_TAG_INTEGER, name, &value.to_be_bytes())
    }

    pub fn enum_attr(&mut self, name: &str, value: i32) -> &mut Self {
        self.write_attr(VALUE_TAG_ENUM, name, &value.to_be_bytes())
    }

    pub fn enum_additional(&mut self, value: i32) -> &mut Self {
        self.write_attr(VALUE_TAG_ENUM, "", &value.to_be_bytes())
    }

    pub fn boolean(&mut self, name: &str, value: bool) -> &mut Self {
        self.write_attr(VALUE_TAG_BOOLEAN, name, &[u8::from(value)])
    }

    /// A `{ x-dimension, y-dimension }` media-size collection in hundredths
    /// of a millimetre.  An empty `name` adds another value to the previous
    /// attribute.
    pub fn media_size(&mut self, name: &str, x_hmm: i32, y_hmm: i32) -> &mut Self {
        self.write_attr(VALUE_TAG_BEGIN_COLLECTION, name, &[])
            .write_attr(VALUE_TAG_MEMBER_NAME, "", b"x-dimension")
            .write_attr(VALUE_TAG_INTEGER, "", &x_hmm.to_be_bytes())
            .write_attr(VALUE_TAG_MEMBER_NAME, "", b"y-dimension")
            .write_attr(VALUE_TAG_INTEGER, "", &y_hmm.to_be_bytes())
            .write_attr(VALUE_TAG_END_COLLECTION, "", &[])
    }

    pub fn write_attr(&mut self, value_tag: u8, name: &str, value: &[u8]) -> &mut Self {
        if self.message.groups.is_empty() {
            self.begin_group(TAG_OPERATION_ATTRIBUTES);
        }
        if let Some(group) = self.message.groups.last_mut() {
            group.attributes.push(IppAttribute {
                value_tag,
                name: name.to_owned(),
                value: value.to_vec(),
            });
        }
        self
    }

    /// Finish and return the message model.
    pub fn finish(self) -> IppMessage {
        self.message
    }

    /// Finish and encode.
    pub fn build(self) -> Vec<u8> {
        self.message.encode()
    }
}

/// A response carrying only the operation-attributes group.
pub fn error_response(request: Option<&IppMessage>, status: u16) -> IppMessage {
    let mut resp = match request {
        Some(req) => IppResponseBuilder::reply_to(req, status),
        None => IppResponseBuilder::new((1, 1), status, 0),
    };
    resp.operation_attributes();
    resp.finish()
}

/// Build a minimal IPP request for testing.
#[cfg(test)]
pub(crate) fn build_test_request(
    operation: u16,
    request_id: u32,
    attributes: &[(u8, &str, &[u8])],
    document: Option<&[u8]>,
) -> Vec<u8> {
    let mut buf = vec![0x02, 0x00];
    buf.extend_from_slice(&operation.to_be_bytes());
    buf.extend_from_slice(&request_id.to_be_bytes());
    buf.push(TAG_OPERATION_ATTRIBUTES);
    write_attr(&mut buf, VALUE_TAG_CHARSET, b"attributes-charset", b"utf-8");
    write_attr(&mut buf, VALUE_TAG_NATURAL_LANGUAGE, b"attributes-natural-language", b"en");
    for &(tag, name, value) in attributes {
        write_attr(&mut buf, tag, name.as_bytes(), value);
    }
    if let Some(doc) = document {
        buf.push(TAG_END_OF_ATTRIBUTES);
        buf.extend_from_slice(doc);
    }
    buf
}
