//! SAML wire plumbing
//!
//! AuthnRequest construction and redirect-binding encoding, IdP metadata
//! parsing, and response validation. Full XML-DSig verification is delegated
//! to the [`SamlValidator`] seam; the default validator checks response
//! status, certificate thumbprint and assertion shape.

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use chrono::Utc;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use quick_xml::events::Event;
use quick_xml::Reader;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::io::{Read, Write};

use gatehouse_core::{
    GatehouseError, LoginType, Result, SamlMetadata, SsoEndpoints,
};

const EMAIL_CLAIM: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress";
const GIVEN_NAME_CLAIM: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/givenname";
const SURNAME_CLAIM: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/surname";
const NAME_ID_CLAIM: &str =
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier";

/// Identity attributes extracted from a validated SAML assertion.
#[derive(Debug, Clone)]
pub struct SamlAttributes {
    pub name_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub raw: serde_json::Value,
}

/// Validation seam for inbound SAML responses.
pub trait SamlValidator: Send + Sync {
    fn validate(&self, response_xml: &str, metadata: &SamlMetadata) -> Result<SamlAttributes>;
}

/// Build an AuthnRequest document for SP-initiated login.
///
/// Returns `(request_id, xml)`; the id is persisted with the pending flow so
/// the response's `InResponseTo` can be checked.
pub fn build_authn_request(
    sp_entity_id: &str,
    acs_url: &str,
    destination: &str,
    force_authn: bool,
) -> (String, String) {
    let id = format!("_{}", uuid::Uuid::new_v4().simple());
    let instant = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
    let force = if force_authn {
        " ForceAuthn=\"true\""
    } else {
        ""
    };
    let xml = format!(
        r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="{id}" Version="2.0" IssueInstant="{instant}" Destination="{destination}" AssertionConsumerServiceURL="{acs_url}" ProtocolBinding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST"{force}><saml:Issuer>{sp_entity_id}</saml:Issuer><samlp:NameIDPolicy Format="urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified" AllowCreate="true"/></samlp:AuthnRequest>"#
    );
    (id, xml)
}

/// Redirect binding: raw-deflate then base64.
pub fn deflate_and_encode(xml: &str) -> Result<String> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(xml.as_bytes())
        .and_then(|_| encoder.finish())
        .map(|compressed| B64.encode(compressed))
        .map_err(|e| GatehouseError::internal(format!("Failed to deflate SAML request: {e}")))
}

/// Decode a redirect-binding `SAMLRequest` back into XML.
pub fn decode_redirect_request(encoded: &str) -> Result<String> {
    let compressed = B64
        .decode(encoded.trim())
        .map_err(|e| GatehouseError::invalid_input(format!("Invalid SAMLRequest encoding: {e}")))?;
    let mut decoder = DeflateDecoder::new(compressed.as_slice());
    let mut xml = String::new();
    decoder
        .read_to_string(&mut xml)
        .map_err(|e| GatehouseError::invalid_input(format!("Invalid SAMLRequest payload: {e}")))?;
    Ok(xml)
}

/// Decode a POST-binding `SAMLResponse` (plain base64, no deflate).
pub fn decode_post_response(encoded: &str) -> Result<String> {
    let bytes = B64
        .decode(encoded.trim())
        .map_err(|e| GatehouseError::invalid_input(format!("Invalid SAMLResponse encoding: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|e| GatehouseError::invalid_input(format!("Invalid SAMLResponse payload: {e}")))
}

/// Issuer and request id of an inbound AuthnRequest (federation SSO endpoint).
#[derive(Debug, Clone)]
pub struct ParsedAuthnRequest {
    pub id: String,
    pub issuer: String,
    pub acs_url: Option<String>,
}

pub fn parse_authn_request(xml: &str) -> Result<ParsedAuthnRequest> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut id = None;
    let mut acs_url = None;
    let mut issuer = None;
    let mut in_issuer = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let local = e.local_name();
                match local.as_ref() {
                    b"AuthnRequest" => {
                        for attr in e.attributes().flatten() {
                            match attr.key.local_name().as_ref() {
                                b"ID" => id = Some(attr_value(&attr)?),
                                b"AssertionConsumerServiceURL" => {
                                    acs_url = Some(attr_value(&attr)?)
                                }
                                _ => {}
                            }
                        }
                    }
                    b"Issuer" => in_issuer = true,
                    _ => {}
                }
            }
            Ok(Event::Text(t)) if in_issuer => {
                issuer = Some(
                    t.unescape()
                        .map_err(|e| {
                            GatehouseError::invalid_input(format!("Malformed AuthnRequest: {e}"))
                        })?
                        .into_owned(),
                );
                in_issuer = false;
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"Issuer" => in_issuer = false,
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(GatehouseError::invalid_input(format!(
                    "Malformed AuthnRequest: {e}"
                )))
            }
            _ => {}
        }
    }

    Ok(ParsedAuthnRequest {
        id: id.ok_or_else(|| GatehouseError::invalid_input("AuthnRequest is missing an ID"))?,
        issuer: issuer
            .ok_or_else(|| GatehouseError::invalid_input("AuthnRequest is missing an Issuer"))?,
        acs_url,
    })
}

fn attr_value(attr: &quick_xml::events::attributes::Attribute<'_>) -> Result<String> {
    attr.unescape_value()
        .map(|v| v.into_owned())
        .map_err(|e| GatehouseError::invalid_input(format!("Malformed XML attribute: {e}")))
}

/// Parse IdP metadata XML into the stored connection shape.
pub fn parse_idp_metadata(xml: &str) -> Result<SamlMetadata> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entity_id = None;
    let mut post_url = None;
    let mut redirect_url = None;
    let mut cert = None;
    let mut in_cert = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"EntityDescriptor" => {
                    for attr in e.attributes().flatten() {
                        if attr.key.local_name().as_ref() == b"entityID" {
                            entity_id = Some(attr_value(&attr)?);
                        }
                    }
                }
                b"SingleSignOnService" => {
                    let mut binding = String::new();
                    let mut location = String::new();
                    for attr in e.attributes().flatten() {
                        match attr.key.local_name().as_ref() {
                            b"Binding" => binding = attr_value(&attr)?,
                            b"Location" => location = attr_value(&attr)?,
                            _ => {}
                        }
                    }
                    if binding.ends_with("HTTP-POST") {
                        post_url = Some(location);
                    } else if binding.ends_with("HTTP-Redirect") {
                        redirect_url = Some(location);
                    }
                }
                b"X509Certificate" => in_cert = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_cert => {
                // First signing certificate wins
                if cert.is_none() {
                    let raw = t
                        .unescape()
                        .map_err(|e| {
                            GatehouseError::invalid_input(format!("Malformed metadata: {e}"))
                        })?
                        .split_whitespace()
                        .collect::<String>();
                    cert = Some(raw);
                }
                in_cert = false;
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"X509Certificate" => in_cert = false,
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(GatehouseError::invalid_input(format!(
                    "Could not parse IdP metadata: {e}"
                )))
            }
            _ => {}
        }
    }

    let entity_id = entity_id
        .ok_or_else(|| GatehouseError::invalid_input("IdP metadata is missing entityID"))?;
    let cert =
        cert.ok_or_else(|| GatehouseError::invalid_input("IdP metadata is missing a certificate"))?;
    if post_url.is_none() && redirect_url.is_none() {
        return Err(GatehouseError::invalid_input(
            "IdP metadata is missing a SingleSignOnService endpoint",
        ));
    }

    let provider = entity_id
        .parse::<url::Url>()
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "Unknown".to_string());

    Ok(SamlMetadata {
        sso: SsoEndpoints {
            post_url,
            redirect_url,
        },
        entity_id,
        thumbprint: certificate_thumbprint(&cert)?,
        login_type: LoginType::Sp,
        provider,
    })
}

/// SHA-1 thumbprint (hex) over the DER bytes of a base64 PEM body.
pub fn certificate_thumbprint(cert_base64: &str) -> Result<String> {
    let der = B64
        .decode(cert_base64)
        .map_err(|e| GatehouseError::invalid_input(format!("Invalid certificate: {e}")))?;
    let mut hasher = Sha1::new();
    hasher.update(&der);
    Ok(hex::encode(hasher.finalize()))
}

/// Default validator: XML-shape and thumbprint checks.
///
/// Accepts a response when its status is Success, the embedded signing
/// certificate matches the connection's recorded thumbprint, and an assertion
/// subject is present. Signature cryptography itself sits behind this seam.
#[derive(Default)]
pub struct XmlSamlValidator;

impl SamlValidator for XmlSamlValidator {
    fn validate(&self, response_xml: &str, metadata: &SamlMetadata) -> Result<SamlAttributes> {
        let parsed = parse_saml_response(response_xml)?;

        if !parsed.success {
            return Err(GatehouseError::unauthorized(
                "SAML response reported a non-success status",
            ));
        }
        match &parsed.certificate {
            Some(cert) if certificate_thumbprint(cert)? == metadata.thumbprint => {}
            Some(_) => {
                return Err(GatehouseError::unauthorized(
                    "SAML response certificate does not match the connection",
                ))
            }
            None => {
                return Err(GatehouseError::unauthorized(
                    "SAML response is not signed",
                ))
            }
        }

        let name_id = parsed
            .name_id
            .ok_or_else(|| GatehouseError::unauthorized("SAML assertion is missing a subject"))?;

        let attr = |keys: &[&str]| -> String {
            keys.iter()
                .find_map(|k| parsed.attributes.get(*k).cloned())
                .unwrap_or_default()
        };
        let email = {
            let e = attr(&[EMAIL_CLAIM, "email", "mail"]);
            if e.is_empty() {
                name_id.clone()
            } else {
                e
            }
        };
        let id = {
            let i = attr(&[NAME_ID_CLAIM, "id"]);
            if i.is_empty() {
                name_id.clone()
            } else {
                i
            }
        };

        Ok(SamlAttributes {
            name_id: id,
            email,
            first_name: attr(&[GIVEN_NAME_CLAIM, "firstName", "givenName"]),
            last_name: attr(&[SURNAME_CLAIM, "lastName", "surname"]),
            raw: serde_json::to_value(&parsed.attributes).unwrap_or_default(),
        })
    }
}

struct ParsedSamlResponse {
    success: bool,
    name_id: Option<String>,
    certificate: Option<String>,
    attributes: HashMap<String, String>,
}

fn parse_saml_response(xml: &str) -> Result<ParsedSamlResponse> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut success = false;
    let mut name_id = None;
    let mut certificate = None;
    let mut attributes = HashMap::new();

    enum TextTarget {
        None,
        NameId,
        Certificate,
        AttributeValue(String),
    }
    let mut target = TextTarget::None;
    let mut current_attribute: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"StatusCode" => {
                    for attr in e.attributes().flatten() {
                        if attr.key.local_name().as_ref() == b"Value"
                            && attr_value(&attr)?.ends_with(":Success")
                        {
                            success = true;
                        }
                    }
                }
                b"NameID" => target = TextTarget::NameId,
                b"X509Certificate" => target = TextTarget::Certificate,
                b"Attribute" => {
                    for attr in e.attributes().flatten() {
                        if attr.key.local_name().as_ref() == b"Name" {
                            current_attribute = Some(attr_value(&attr)?);
                        }
                    }
                }
                b"AttributeValue" => {
                    if let Some(name) = current_attribute.clone() {
                        target = TextTarget::AttributeValue(name);
                    }
                }
                _ => {}
            },
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| {
                        GatehouseError::invalid_input(format!("Malformed SAML response: {e}"))
                    })?
                    .into_owned();
                match std::mem::replace(&mut target, TextTarget::None) {
                    TextTarget::NameId => name_id = Some(text),
                    TextTarget::Certificate => {
                        if certificate.is_none() {
                            certificate = Some(text.split_whitespace().collect());
                        }
                    }
                    TextTarget::AttributeValue(name) => {
                        attributes.insert(name, text);
                    }
                    TextTarget::None => {}
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"Attribute" {
                    current_attribute = None;
                }
                target = TextTarget::None;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(GatehouseError::invalid_input(format!(
                    "Malformed SAML response: {e}"
                )))
            }
            _ => {}
        }
    }

    Ok(ParsedSamlResponse {
        success,
        name_id,
        certificate,
        attributes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const METADATA: &str = r#"<?xml version="1.0"?>
<EntityDescriptor xmlns="urn:oasis:names:tc:SAML:2.0:metadata" entityID="https://idp.example.com/saml">
  <IDPSSODescriptor>
    <KeyDescriptor use="signing">
      <KeyInfo xmlns="http://www.w3.org/2000/09/xmldsig#">
        <X509Data><X509Certificate>aGVsbG8gY2VydA==</X509Certificate></X509Data>
      </KeyInfo>
    </KeyDescriptor>
    <SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="https://idp.example.com/sso/redirect"/>
    <SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="https://idp.example.com/sso/post"/>
  </IDPSSODescriptor>
</EntityDescriptor>"#;

    #[test]
    fn test_parse_idp_metadata() {
        let meta = parse_idp_metadata(METADATA).unwrap();
        assert_eq!(meta.entity_id, "https://idp.example.com/saml");
        assert_eq!(
            meta.sso.post_url.as_deref(),
            Some("https://idp.example.com/sso/post")
        );
        assert_eq!(
            meta.sso.redirect_url.as_deref(),
            Some("https://idp.example.com/sso/redirect")
        );
        assert_eq!(meta.provider, "idp.example.com");
        assert_eq!(
            meta.thumbprint,
            certificate_thumbprint("aGVsbG8gY2VydA==").unwrap()
        );
    }

    #[test]
    fn test_parse_idp_metadata_without_entity_id_fails() {
        let err = parse_idp_metadata("<EntityDescriptor/>").unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_authn_request_roundtrip_through_redirect_binding() {
        let (id, xml) = build_authn_request(
            "https://broker.example.com",
            "https://broker.example.com/acs",
            "https://idp.example.com/sso",
            true,
        );
        assert!(xml.contains(&id));
        assert!(xml.contains("ForceAuthn=\"true\""));

        let encoded = deflate_and_encode(&xml).unwrap();
        let decoded = decode_redirect_request(&encoded).unwrap();
        assert_eq!(decoded, xml);

        let parsed = parse_authn_request(&decoded).unwrap();
        assert_eq!(parsed.id, id);
        assert_eq!(parsed.issuer, "https://broker.example.com");
        assert_eq!(
            parsed.acs_url.as_deref(),
            Some("https://broker.example.com/acs")
        );
    }

    fn response_xml(cert: &str, status: &str) -> String {
        format!(
            r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion">
  <samlp:Status><samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:{status}"/></samlp:Status>
  <saml:Assertion>
    <ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
      <ds:KeyInfo><ds:X509Data><ds:X509Certificate>{cert}</ds:X509Certificate></ds:X509Data></ds:KeyInfo>
    </ds:Signature>
    <saml:Subject><saml:NameID>jdoe@example.com</saml:NameID></saml:Subject>
    <saml:AttributeStatement>
      <saml:Attribute Name="firstName"><saml:AttributeValue>Jane</saml:AttributeValue></saml:Attribute>
      <saml:Attribute Name="lastName"><saml:AttributeValue>Doe</saml:AttributeValue></saml:Attribute>
      <saml:Attribute Name="email"><saml:AttributeValue>jdoe@example.com</saml:AttributeValue></saml:Attribute>
    </saml:AttributeStatement>
  </saml:Assertion>
</samlp:Response>"#
        )
    }

    fn metadata_with_cert(cert: &str) -> SamlMetadata {
        SamlMetadata {
            sso: SsoEndpoints {
                post_url: Some("https://idp.example.com/sso".into()),
                redirect_url: None,
            },
            entity_id: "https://idp.example.com".into(),
            thumbprint: certificate_thumbprint(cert).unwrap(),
            login_type: LoginType::Sp,
            provider: "idp.example.com".into(),
        }
    }

    #[test]
    fn test_validator_accepts_matching_certificate() {
        let cert = "aGVsbG8gY2VydA==";
        let attrs = XmlSamlValidator
            .validate(&response_xml(cert, "Success"), &metadata_with_cert(cert))
            .unwrap();
        assert_eq!(attrs.email, "jdoe@example.com");
        assert_eq!(attrs.first_name, "Jane");
        assert_eq!(attrs.last_name, "Doe");
        assert_eq!(attrs.name_id, "jdoe@example.com");
    }

    #[test]
    fn test_validator_rejects_certificate_mismatch() {
        let err = XmlSamlValidator
            .validate(
                &response_xml("b3RoZXIgY2VydA==", "Success"),
                &metadata_with_cert("aGVsbG8gY2VydA=="),
            )
            .unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    #[test]
    fn test_validator_rejects_failed_status() {
        let cert = "aGVsbG8gY2VydA==";
        let err = XmlSamlValidator
            .validate(&response_xml(cert, "Requester"), &metadata_with_cert(cert))
            .unwrap_err();
        assert_eq!(err.status_code(), 401);
    }
}
