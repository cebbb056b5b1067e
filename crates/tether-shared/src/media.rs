use std::fmt;
use std::str::FromStr;

/// The media variants the bridge recognizes on inbound and outbound
/// messages. Anything else is treated as a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Document => "document",
        }
    }

    /// File extension used when synthesizing a filename for media that
    /// arrives without one. Documents keep a bare name.
    pub fn synthetic_extension(&self) -> Option<&'static str> {
        match self {
            MediaKind::Image => Some("jpg"),
            MediaKind::Video => Some("mp4"),
            MediaKind::Audio => Some("ogg"),
            MediaKind::Document => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            "audio" => Ok(MediaKind::Audio),
            "document" => Ok(MediaKind::Document),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        for kind in [
            MediaKind::Image,
            MediaKind::Video,
            MediaKind::Audio,
            MediaKind::Document,
        ] {
            assert_eq!(kind.as_str().parse::<MediaKind>(), Ok(kind));
        }
        assert!("sticker".parse::<MediaKind>().is_err());
    }

    #[test]
    fn document_has_no_extension() {
        assert_eq!(MediaKind::Document.synthetic_extension(), None);
        assert_eq!(MediaKind::Audio.synthetic_extension(), Some("ogg"));
    }
}
