//! Listing-page parsers for web endpoints.
//!
//! The set of parsers is a fixed, named strategy enum; sites differ only in
//! how entries and timestamps are extracted from their listing pages.

use chrono::{FixedOffset, NaiveDateTime, TimeZone};
use once_cell::sync::Lazy;
use regex_lite::Regex;

use super::{Listing, RemoteFile, T0_TIMESTAMP};

/// Known listing-page parsers, selected by configuration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingParserKind {
    /// Apache-style auto-index tables (`[DIR]` / `[   ]` alt markers).
    Generic,
    /// SHAO correlator plain-text listing pages.
    Shao,
    /// NASA EarthData archive browser markup.
    EarthData,
}

impl ListingParserKind {
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "generic" => Some(Self::Generic),
            "shao" => Some(Self::Shao),
            "earthdata" => Some(Self::EarthData),
            _ => None,
        }
    }

    pub fn as_key(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Shao => "shao",
            Self::EarthData => "earthdata",
        }
    }

    /// Decode a listing page into folders and timestamped files.
    pub fn parse(&self, content: &str, utc_offset_minutes: i32) -> Listing {
        match self {
            Self::Generic => parse_generic(content, utc_offset_minutes),
            Self::Shao => parse_shao(content, utc_offset_minutes),
            Self::EarthData => parse_earthdata(content, utc_offset_minutes),
        }
    }
}

/// Interpret a naive local time in the endpoint's UTC offset.
pub(crate) fn local_to_timestamp(naive: NaiveDateTime, utc_offset_minutes: i32) -> i64 {
    FixedOffset::east_opt(utc_offset_minutes * 60)
        .and_then(|offset| offset.from_local_datetime(&naive).single())
        .map(|dt| dt.timestamp())
        .unwrap_or(T0_TIMESTAMP)
}

static TABLE_ROW: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<tr.*?</tr>").expect("row regex"));
static ALT_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"alt="(\[[^"]*\])""#).expect("alt regex"));
static HREF: Lazy<Regex> = Lazy::new(|| Regex::new(r#"href="([^"]+)""#).expect("href regex"));
static WEB_TIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{4}-\d{2}-\d{2} \d{2}:\d{2}").expect("time regex"));

fn parse_generic(content: &str, utc_offset_minutes: i32) -> Listing {
    let mut listing = Listing::default();
    for row in TABLE_ROW.find_iter(content) {
        let row = row.as_str();
        let marker = match ALT_MARKER.captures(row) {
            Some(caps) => caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default(),
            None => continue,
        };
        let name = match HREF.captures(row) {
            Some(caps) => caps
                .get(1)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default(),
            None => continue,
        };
        match marker.as_str() {
            "[DIR]" => listing.folders.push(name),
            "[   ]" => {
                let timestamp = decode_web_time(row, utc_offset_minutes);
                listing.files.push(RemoteFile { name, timestamp });
            }
            _ => {}
        }
    }
    listing
}

/// Find a `YYYY-MM-DD HH:MM` cell anywhere in the row.
fn decode_web_time(row: &str, utc_offset_minutes: i32) -> i64 {
    WEB_TIME
        .find(row)
        .and_then(|m| NaiveDateTime::parse_from_str(m.as_str(), "%Y-%m-%d %H:%M").ok())
        .map(|naive| local_to_timestamp(naive, utc_offset_minutes))
        .unwrap_or(T0_TIMESTAMP)
}

static DB_IN_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{2}[A-Z]{3}\d{2}[A-Z]{2}").expect("db regex"));

fn parse_shao(content: &str, utc_offset_minutes: i32) -> Listing {
    let mut listing = Listing::default();
    for line in content.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 3 || !DB_IN_LINE.is_match(tokens[0]) {
            continue;
        }
        let timestamp = NaiveDateTime::parse_from_str(
            &format!("{} {}", tokens[1], tokens[2]),
            "%d-%b-%Y %H:%M",
        )
        .map(|naive| local_to_timestamp(naive, utc_offset_minutes))
        .unwrap_or(T0_TIMESTAMP);
        listing.files.push(RemoteFile {
            name: tokens[0].to_string(),
            timestamp,
        });
    }
    listing
}

static ED_DIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"class="archiveDirText[^"]*"[^>]*href="([^"]+)""#).expect("dir regex")
});
static ED_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)class="archiveItemText[^"]*"[^>]*href="([^"]+)".*?class="fileInfo"[^>]*>([^<]+)<"#,
    )
    .expect("item regex")
});

fn parse_earthdata(content: &str, utc_offset_minutes: i32) -> Listing {
    let mut listing = Listing::default();
    for caps in ED_DIR.captures_iter(content) {
        if let Some(href) = caps.get(1) {
            listing.folders.push(href.as_str().trim().to_string());
        }
    }
    for caps in ED_ITEM.captures_iter(content) {
        let (Some(href), Some(info)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let stamp = info.as_str().trim();
        let timestamp = stamp
            .get(0..19)
            .and_then(|s| NaiveDateTime::parse_from_str(s, "%Y:%m:%d %H:%M:%S").ok())
            .map(|naive| local_to_timestamp(naive, utc_offset_minutes))
            .unwrap_or(T0_TIMESTAMP);
        listing.files.push(RemoteFile {
            name: href.as_str().trim().to_string(),
            timestamp,
        });
    }
    listing
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const GENERIC_PAGE: &str = r#"
<table>
<tr><th>Name</th></tr>
<tr><td><img src="/icons/back.gif" alt="[PARENTDIR]"></td><td><a href="/pub/">Parent</a></td></tr>
<tr><td><img src="/icons/folder.gif" alt="[DIR]"></td><td><a href="2024/">2024/</a></td><td>2024-01-05 08:00</td></tr>
<tr><td><img src="/icons/unknown.gif" alt="[   ]"></td><td><a href="24JAN02XE.tgz">24JAN02XE.tgz</a></td><td>2024-01-03 12:30</td></tr>
</table>
"#;

    #[test]
    fn test_generic_parser() {
        let listing = ListingParserKind::Generic.parse(GENERIC_PAGE, 0);
        assert_eq!(listing.folders, vec!["2024/"]);
        assert_eq!(listing.files.len(), 1);
        assert_eq!(listing.files[0].name, "24JAN02XE.tgz");

        let expected = NaiveDate::from_ymd_opt(2024, 1, 3)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap()
            .and_utc()
            .timestamp();
        assert_eq!(listing.files[0].timestamp, expected);
    }

    #[test]
    fn test_generic_parser_offset() {
        // One hour east of UTC: local 12:30 is 11:30 UTC.
        let utc = ListingParserKind::Generic.parse(GENERIC_PAGE, 0);
        let east = ListingParserKind::Generic.parse(GENERIC_PAGE, 60);
        assert_eq!(east.files[0].timestamp, utc.files[0].timestamp - 3600);
    }

    #[test]
    fn test_generic_parser_missing_time_uses_sentinel() {
        let page = r#"<tr><td><img alt="[   ]"></td><td><a href="notes.txt">notes.txt</a></td></tr>"#;
        let listing = ListingParserKind::Generic.parse(page, 0);
        assert_eq!(listing.files[0].timestamp, T0_TIMESTAMP);
    }

    #[test]
    fn test_shao_parser() {
        let page = "\
<pre>
24JAN02XE.tgz      03-Jan-2024 20:15   512M
24JAN08XA.tgz      09-Jan-2024 02:00   498M
readme.txt         01-Jan-2024 00:00   1K
</pre>";
        let listing = ListingParserKind::Shao.parse(page, 480);
        assert_eq!(listing.files.len(), 2);
        assert_eq!(listing.files[0].name, "24JAN02XE.tgz");
        let expected = NaiveDate::from_ymd_opt(2024, 1, 3)
            .unwrap()
            .and_hms_opt(20, 15, 0)
            .unwrap()
            .and_utc()
            .timestamp()
            - 480 * 60;
        assert_eq!(listing.files[0].timestamp, expected);
    }

    #[test]
    fn test_earthdata_parser() {
        let page = r#"
<a class="archiveDirText" href="/archive/vlbi/2024/">2024</a>
<div class="archiveItemTextContainer">
  <a class="archiveItemText" href="/archive/vlbi/24JAN02XE.tgz">24JAN02XE.tgz</a>
  <span class="fileInfo">2024:01:03 12:30:00 512 MB</span>
</div>
"#;
        let listing = ListingParserKind::EarthData.parse(page, 0);
        assert_eq!(listing.folders, vec!["/archive/vlbi/2024/"]);
        assert_eq!(listing.files.len(), 1);
        assert_eq!(listing.files[0].name, "/archive/vlbi/24JAN02XE.tgz");
        let expected = NaiveDate::from_ymd_opt(2024, 1, 3)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap()
            .and_utc()
            .timestamp();
        assert_eq!(listing.files[0].timestamp, expected);
    }

    #[test]
    fn test_from_key() {
        assert_eq!(ListingParserKind::from_key("generic"), Some(ListingParserKind::Generic));
        assert_eq!(ListingParserKind::from_key("shao"), Some(ListingParserKind::Shao));
        assert_eq!(ListingParserKind::from_key("earthdata"), Some(ListingParserKind::EarthData));
        assert_eq!(ListingParserKind::from_key("bogus"), None);
    }
}
