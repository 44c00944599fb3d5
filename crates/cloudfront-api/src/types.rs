use quick_xml::escape::escape;
use quick_xml::events::{BytesText, Event};
use quick_xml::{Reader, Writer};
use serde::Deserialize;

use crate::{Error, Result};

const XMLNS: &str = "http://cloudfront.amazonaws.com/doc/2020-05-31/";

/// A response body paired with the `ETag` CloudFront returned alongside it.
///
/// The tag is the concurrency token required by the next mutating call on the
/// same distribution. It is only valid until the distribution changes again.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub value: T,
    pub etag: String,
}

// ── Distribution ────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Distribution {
    pub id: String,
    pub status: String,
    pub domain_name: String,
}

impl Distribution {
    pub fn is_deployed(&self) -> bool {
        self.status == "Deployed"
    }
}

/// Parameters for a new custom-origin distribution.
///
/// The cache behaviour is fixed: every HTTP method is allowed, cookies and
/// query strings are forwarded in full, and the origin is reached with the
/// viewer's protocol over TLS 1.0 to 1.2.
#[derive(Debug, Clone)]
pub struct NewDistribution {
    pub caller_reference: String,
    pub origin_domain: String,
    pub comment: String,
}

impl NewDistribution {
    pub fn to_xml(&self) -> String {
        let origin = escape(self.origin_domain.as_str());
        let caller_reference = escape(self.caller_reference.as_str());
        let comment = escape(self.comment.as_str());

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<DistributionConfig xmlns="{XMLNS}">
  <CallerReference>{caller_reference}</CallerReference>
  <Origins>
    <Quantity>1</Quantity>
    <Items>
      <Origin>
        <Id>{origin}</Id>
        <DomainName>{origin}</DomainName>
        <OriginPath></OriginPath>
        <CustomHeaders><Quantity>0</Quantity></CustomHeaders>
        <CustomOriginConfig>
          <HTTPPort>80</HTTPPort>
          <HTTPSPort>443</HTTPSPort>
          <OriginProtocolPolicy>match-viewer</OriginProtocolPolicy>
          <OriginSslProtocols>
            <Quantity>3</Quantity>
            <Items>
              <SslProtocol>TLSv1</SslProtocol>
              <SslProtocol>TLSv1.1</SslProtocol>
              <SslProtocol>TLSv1.2</SslProtocol>
            </Items>
          </OriginSslProtocols>
        </CustomOriginConfig>
      </Origin>
    </Items>
  </Origins>
  <OriginGroups><Quantity>0</Quantity></OriginGroups>
  <DefaultCacheBehavior>
    <TargetOriginId>{origin}</TargetOriginId>
    <TrustedSigners>
      <Enabled>false</Enabled>
      <Quantity>0</Quantity>
    </TrustedSigners>
    <ViewerProtocolPolicy>allow-all</ViewerProtocolPolicy>
    <AllowedMethods>
      <Quantity>7</Quantity>
      <Items>
        <Method>GET</Method>
        <Method>HEAD</Method>
        <Method>POST</Method>
        <Method>PUT</Method>
        <Method>PATCH</Method>
        <Method>OPTIONS</Method>
        <Method>DELETE</Method>
      </Items>
      <CachedMethods>
        <Quantity>2</Quantity>
        <Items>
          <Method>GET</Method>
          <Method>HEAD</Method>
        </Items>
      </CachedMethods>
    </AllowedMethods>
    <ForwardedValues>
      <QueryString>true</QueryString>
      <Cookies><Forward>all</Forward></Cookies>
      <Headers><Quantity>0</Quantity></Headers>
      <QueryStringCacheKeys><Quantity>0</Quantity></QueryStringCacheKeys>
    </ForwardedValues>
    <MinTTL>0</MinTTL>
  </DefaultCacheBehavior>
  <Comment>{comment}</Comment>
  <Enabled>true</Enabled>
</DistributionConfig>
"#
        )
    }
}

// ── DistributionConfig document ─────────────────────────────────────

/// A distribution's full configuration exactly as CloudFront returned it.
///
/// Updates must echo back the whole document, so it is kept as raw XML and
/// only the top-level `<Enabled>` flag is ever rewritten.
#[derive(Debug, Clone)]
pub struct DistributionConfigDocument {
    xml: String,
}

impl DistributionConfigDocument {
    pub fn from_xml(xml: impl Into<String>) -> Self {
        Self { xml: xml.into() }
    }

    pub fn as_xml(&self) -> &str {
        &self.xml
    }

    /// Value of the top-level `<Enabled>` element.
    pub fn enabled(&self) -> Result<bool> {
        let mut reader = Reader::from_str(&self.xml);
        let mut depth = 0usize;
        let mut in_enabled = false;

        loop {
            match reader.read_event()? {
                Event::Eof => break,
                Event::Start(e) => {
                    depth += 1;
                    in_enabled = depth == 2 && e.name().as_ref() == b"Enabled";
                }
                Event::End(_) => {
                    depth = depth.saturating_sub(1);
                    in_enabled = false;
                }
                Event::Text(t) if in_enabled => {
                    return Ok(String::from_utf8_lossy(&t).trim() == "true");
                }
                _ => {}
            }
        }

        Err(Error::Malformed("no top-level Enabled element".into()))
    }

    /// Rewrite the top-level `<Enabled>` element, leaving nested ones
    /// (trusted signers, logging, ...) untouched.
    pub fn set_enabled(&mut self, enabled: bool) -> Result<()> {
        let mut reader = Reader::from_str(&self.xml);
        let mut writer = Writer::new(Vec::with_capacity(self.xml.len()));
        let mut depth = 0usize;
        let mut in_enabled = false;
        let mut rewritten = false;

        loop {
            let event = reader.read_event()?;
            match &event {
                Event::Eof => break,
                Event::Start(e) => {
                    depth += 1;
                    in_enabled = depth == 2 && e.name().as_ref() == b"Enabled";
                }
                Event::End(_) => {
                    depth = depth.saturating_sub(1);
                    in_enabled = false;
                }
                Event::Text(_) if in_enabled => {
                    let value = if enabled { "true" } else { "false" };
                    writer
                        .write_event(Event::Text(BytesText::new(value)))
                        .map_err(quick_xml::Error::from)?;
                    rewritten = true;
                    continue;
                }
                _ => {}
            }
            writer.write_event(event).map_err(quick_xml::Error::from)?;
        }

        if !rewritten {
            return Err(Error::Malformed("no top-level Enabled element".into()));
        }

        self.xml = String::from_utf8(writer.into_inner())
            .map_err(|e| Error::Malformed(format!("rewritten config is not utf-8: {e}")))?;
        Ok(())
    }
}

/// Error envelope CloudFront returns on non-2xx responses.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorResponse {
    #[serde(rename = "Error")]
    pub error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ErrorDetail {
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<DistributionConfig xmlns="http://cloudfront.amazonaws.com/doc/2020-05-31/">
  <CallerReference>1700000000</CallerReference>
  <DefaultCacheBehavior>
    <TrustedSigners><Enabled>false</Enabled><Quantity>0</Quantity></TrustedSigners>
  </DefaultCacheBehavior>
  <Logging><Enabled>false</Enabled><Bucket></Bucket></Logging>
  <Enabled>true</Enabled>
</DistributionConfig>"#;

    #[test]
    fn disabling_only_touches_top_level_flag() {
        let mut doc = DistributionConfigDocument::from_xml(CONFIG);
        assert!(doc.enabled().unwrap());

        doc.set_enabled(false).unwrap();

        assert!(!doc.enabled().unwrap());
        assert_eq!(doc.as_xml().matches("<Enabled>false</Enabled>").count(), 3);
        assert!(doc.as_xml().contains("<CallerReference>1700000000</CallerReference>"));
    }

    #[test]
    fn missing_enabled_flag_is_malformed() {
        let mut doc = DistributionConfigDocument::from_xml(
            "<DistributionConfig><Comment>x</Comment></DistributionConfig>",
        );
        assert!(matches!(doc.set_enabled(false), Err(Error::Malformed(_))));
    }

    #[test]
    fn new_distribution_is_parseable_and_enabled() {
        let xml = NewDistribution {
            caller_reference: "1".into(),
            origin_domain: "example.com".into(),
            comment: String::new(),
        }
        .to_xml();

        let doc = DistributionConfigDocument::from_xml(xml);
        assert!(doc.enabled().unwrap());
        assert!(doc.as_xml().contains("<OriginProtocolPolicy>match-viewer</OriginProtocolPolicy>"));
        assert!(doc.as_xml().contains("<Forward>all</Forward>"));
    }

    #[test]
    fn distribution_response_decodes() {
        let dist: Distribution = quick_xml::de::from_str(
            r#"<Distribution>
                 <Id>EDFDVBD6EXAMPLE</Id>
                 <ARN>arn:aws:cloudfront::123456789012:distribution/EDFDVBD6EXAMPLE</ARN>
                 <Status>InProgress</Status>
                 <DomainName>d111111abcdef8.cloudfront.net</DomainName>
               </Distribution>"#,
        )
        .unwrap();

        assert_eq!(dist.id, "EDFDVBD6EXAMPLE");
        assert_eq!(dist.domain_name, "d111111abcdef8.cloudfront.net");
        assert!(!dist.is_deployed());
    }
}
