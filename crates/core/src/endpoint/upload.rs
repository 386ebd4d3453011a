//! Upload strategies for delivery endpoints.

use crate::config::Protocol;

/// Named upload strategies, one per data-center submission flow, selected by
/// configuration key at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadStrategy {
    /// CDDIS authenticated web form: login for cookies, one multipart POST,
    /// confirmation manifest parsed from the response.
    Cddis,
    /// BKG direct FTPS put. No confirmation signal, so every successful
    /// write is reported optimistically.
    Bkg,
    /// OPAR upload form: one multipart POST per file, response body names
    /// the accepted file.
    Opar,
    /// Uploads rejected with a warning.
    #[default]
    None,
}

impl UploadStrategy {
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "cddis" => Some(Self::Cddis),
            "bkg" => Some(Self::Bkg),
            "opar" => Some(Self::Opar),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    pub fn as_key(&self) -> &'static str {
        match self {
            Self::Cddis => "cddis",
            Self::Bkg => "bkg",
            Self::Opar => "opar",
            Self::None => "none",
        }
    }

    /// Whether the strategy can run over the given protocol.
    pub fn supports(&self, protocol: Protocol) -> bool {
        match self {
            Self::Cddis | Self::Opar => protocol.is_web(),
            Self::Bkg => matches!(protocol, Protocol::Ftp | Protocol::Ftps),
            Self::None => true,
        }
    }

    /// Whether the strategy needs a `script` upload-form URL.
    pub fn needs_script(&self) -> bool {
        matches!(self, Self::Cddis | Self::Opar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_key() {
        assert_eq!(UploadStrategy::from_key("cddis"), Some(UploadStrategy::Cddis));
        assert_eq!(UploadStrategy::from_key("bkg"), Some(UploadStrategy::Bkg));
        assert_eq!(UploadStrategy::from_key("opar"), Some(UploadStrategy::Opar));
        assert_eq!(UploadStrategy::from_key("none"), Some(UploadStrategy::None));
        assert_eq!(UploadStrategy::from_key("sftp"), None);
    }

    #[test]
    fn test_protocol_support() {
        assert!(UploadStrategy::Cddis.supports(Protocol::Https));
        assert!(!UploadStrategy::Cddis.supports(Protocol::Ftps));
        assert!(UploadStrategy::Bkg.supports(Protocol::Ftps));
        assert!(!UploadStrategy::Bkg.supports(Protocol::Http));
        assert!(UploadStrategy::None.supports(Protocol::Ftp));
    }

    #[test]
    fn test_needs_script() {
        assert!(UploadStrategy::Cddis.needs_script());
        assert!(UploadStrategy::Opar.needs_script());
        assert!(!UploadStrategy::Bkg.needs_script());
    }
}
