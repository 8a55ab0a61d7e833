//! Hand-rendered S3 XML. The shapes are small and fixed, so a string
//! builder beats a serializer and keeps the output byte-exact.

use st_types::BucketMeta;

use crate::listing::RolledListing;
use crate::time::iso8601_millis;

const XML_HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";
const S3_XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// Escapes the five XML-reserved characters.
pub fn xml_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

/// `<Error>` body for every failed request.
pub fn error_xml(code: &str, message: &str) -> String {
    format!(
        "{XML_HEADER}<Error><Code>{}</Code><Message>{}</Message></Error>",
        xml_escape(code),
        xml_escape(message)
    )
}

/// `ListAllMyBucketsResult` for `GET /`.
pub fn list_buckets_xml(owner: &str, buckets: &[BucketMeta]) -> String {
    let mut xml = String::from(XML_HEADER);
    xml.push_str(&format!("<ListAllMyBucketsResult xmlns=\"{S3_XMLNS}\">\n"));
    xml.push_str("  <Owner>\n");
    xml.push_str(&format!("    <ID>{}</ID>\n", xml_escape(owner)));
    xml.push_str(&format!(
        "    <DisplayName>{}</DisplayName>\n",
        xml_escape(owner)
    ));
    xml.push_str("  </Owner>\n");
    xml.push_str("  <Buckets>\n");
    for bucket in buckets {
        xml.push_str("    <Bucket>\n");
        xml.push_str(&format!(
            "      <Name>{}</Name>\n",
            xml_escape(&bucket.name)
        ));
        xml.push_str(&format!(
            "      <CreationDate>{}</CreationDate>\n",
            iso8601_millis(bucket.creation_time)
        ));
        xml.push_str("    </Bucket>\n");
    }
    xml.push_str("  </Buckets>\n");
    xml.push_str("</ListAllMyBucketsResult>\n");
    xml
}

/// `ListBucketResult` for `GET /{bucket}`, in v1 or v2 dialect.
pub fn list_objects_xml(bucket: &str, listing: &RolledListing, v2: bool) -> String {
    let mut xml = String::from(XML_HEADER);
    xml.push_str(&format!("<ListBucketResult xmlns=\"{S3_XMLNS}\">\n"));
    xml.push_str(&format!("  <Name>{}</Name>\n", xml_escape(bucket)));
    xml.push_str(&format!(
        "  <Prefix>{}</Prefix>\n",
        xml_escape(&listing.prefix)
    ));
    xml.push_str(&format!("  <MaxKeys>{}</MaxKeys>\n", listing.max_keys));
    if !listing.delimiter.is_empty() {
        xml.push_str(&format!(
            "  <Delimiter>{}</Delimiter>\n",
            xml_escape(&listing.delimiter)
        ));
    }
    xml.push_str(&format!(
        "  <IsTruncated>{}</IsTruncated>\n",
        listing.truncated
    ));

    if v2 {
        xml.push_str(&format!("  <KeyCount>{}</KeyCount>\n", listing.contents.len()));
        if let Some(next) = &listing.next_marker {
            xml.push_str(&format!(
                "  <NextContinuationToken>{}</NextContinuationToken>\n",
                xml_escape(next)
            ));
        }
    } else {
        xml.push_str(&format!(
            "  <Marker>{}</Marker>\n",
            xml_escape(&listing.marker)
        ));
        if let Some(next) = &listing.next_marker {
            xml.push_str(&format!(
                "  <NextMarker>{}</NextMarker>\n",
                xml_escape(next)
            ));
        }
    }

    for object in &listing.contents {
        xml.push_str("  <Contents>\n");
        xml.push_str(&format!("    <Key>{}</Key>\n", xml_escape(&object.key)));
        xml.push_str(&format!(
            "    <LastModified>{}</LastModified>\n",
            iso8601_millis(object.last_modified)
        ));
        xml.push_str(&format!(
            "    <ETag>&quot;{}&quot;</ETag>\n",
            xml_escape(&object.etag)
        ));
        xml.push_str(&format!("    <Size>{}</Size>\n", object.size));
        xml.push_str(&format!(
            "    <StorageClass>{}</StorageClass>\n",
            xml_escape(&object.storage_class)
        ));
        xml.push_str("  </Contents>\n");
    }

    for common in &listing.common_prefixes {
        xml.push_str("  <CommonPrefixes>\n");
        xml.push_str(&format!(
            "    <Prefix>{}</Prefix>\n",
            xml_escape(common)
        ));
        xml.push_str("  </CommonPrefixes>\n");
    }

    xml.push_str("</ListBucketResult>\n");
    xml
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_covers_the_reserved_set() {
        assert_eq!(
            xml_escape("a&b<c>d\"e'f"),
            "a&amp;b&lt;c&gt;d&quot;e&apos;f"
        );
        assert_eq!(xml_escape("plain"), "plain");
    }

    #[test]
    fn error_body_shape() {
        let xml = error_xml("NoSuchKey", "no object \"x\"");
        assert!(xml.contains("<Error><Code>NoSuchKey</Code>"));
        assert!(xml.contains("<Message>no object &quot;x&quot;</Message>"));
    }

    #[test]
    fn bucket_listing_shape() {
        let buckets = vec![BucketMeta::new("alpha", "me", 1_704_067_200)];
        let xml = list_buckets_xml("me", &buckets);

        assert!(xml.contains(&format!("xmlns=\"{S3_XMLNS}\"")));
        assert!(xml.contains("<ID>me</ID>"));
        assert!(xml.contains("<Name>alpha</Name>"));
        assert!(xml.contains("<CreationDate>2024-01-01T00:00:00.000Z</CreationDate>"));
    }
}
