//! Transfer-function and gamut inference from possibly incomplete tags.
//!
//! Both resolutions are ordered rule lists ending in a catch-all, so
//! [`infer`] always produces a concrete pair.

use std::fmt;

use log::warn;

use crate::probe::AssetDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferFunction {
    Pq,
    Hlg,
}

impl TransferFunction {
    /// Selector understood by `ultrahdr_app` (`-t` / `-o`).
    pub fn uhdr_code(self) -> u8 {
        match self {
            TransferFunction::Hlg => 1,
            TransferFunction::Pq => 2,
        }
    }

    /// `-color_trc` value for the muxer.
    pub fn ffmpeg_trc(self) -> &'static str {
        match self {
            TransferFunction::Hlg => "arib-std-b67",
            TransferFunction::Pq => "smpte2084",
        }
    }
}

impl fmt::Display for TransferFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransferFunction::Pq => "PQ",
            TransferFunction::Hlg => "HLG",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gamut {
    Bt709,
    P3,
    Bt2020,
}

impl Gamut {
    /// Integer tag expected by the gain-map encoder (`-C`).
    pub fn code(self) -> u8 {
        match self {
            Gamut::Bt709 => 0,
            Gamut::P3 => 1,
            Gamut::Bt2020 => 2,
        }
    }

    /// `-color_primaries` value for the muxer.
    pub fn ffmpeg_primaries(self) -> &'static str {
        match self {
            Gamut::Bt709 => "bt709",
            Gamut::P3 => "smpte432",
            Gamut::Bt2020 => "bt2020",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Gamut::Bt709 => "BT.709 / sRGB",
            Gamut::P3 => "Display P3",
            Gamut::Bt2020 => "BT.2020",
        }
    }
}

impl fmt::Display for Gamut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How the transfer function was arrived at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferSource {
    Tagged,
    /// No usable tag; HLG was assumed.
    Defaulted,
}

/// How the gamut was arrived at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamutSource {
    Matched,
    /// No colour tags at all; derived from the transfer function.
    DefaultedFromTransfer,
    /// Colour tags were present but none was recognised.
    UnrecognizedTags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorDecision {
    pub transfer: TransferFunction,
    pub gamut: Gamut,
    pub gamut_code: u8,
    pub had_explicit_color_info: bool,
    pub transfer_source: TransferSource,
    pub gamut_source: GamutSource,
}

impl ColorDecision {
    /// Non-fatal facts about guesses made along the way.
    pub fn warnings(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.transfer_source == TransferSource::Defaulted {
            out.push(format!(
                "transfer function not tagged; assuming {}",
                self.transfer
            ));
        }
        if self.gamut_source == GamutSource::UnrecognizedTags {
            out.push(format!(
                "colour tags present but unrecognised; assuming {}",
                self.gamut
            ));
        }
        out
    }
}

struct Rule<T> {
    needles: &'static [&'static str],
    result: T,
}

const TRANSFER_RULES: &[Rule<TransferFunction>] = &[
    Rule {
        needles: &["hlg", "arib", "b67"],
        result: TransferFunction::Hlg,
    },
    Rule {
        needles: &["pq", "smpte", "2084"],
        result: TransferFunction::Pq,
    },
];

const GAMUT_RULES: &[Rule<Gamut>] = &[
    Rule {
        needles: &["2020", "bt.2020", "rec.2020"],
        result: Gamut::Bt2020,
    },
    Rule {
        needles: &["p3", "display p3", "dci-p3"],
        result: Gamut::P3,
    },
    Rule {
        needles: &["709", "bt.709", "rec.709", "srgb"],
        result: Gamut::Bt709,
    },
];

fn first_match<T: Copy>(rules: &[Rule<T>], haystack: &str) -> Option<T> {
    rules
        .iter()
        .find(|rule| rule.needles.iter().any(|n| haystack.contains(n)))
        .map(|rule| rule.result)
}

struct Evidence {
    /// Lowercased colour tags, or the transfer tag when there are none.
    haystack: String,
    has_color_tags: bool,
    tagged_transfer: Option<TransferFunction>,
}

type GamutTier = fn(&Evidence) -> Option<(Gamut, GamutSource)>;

const GAMUT_TIERS: &[GamutTier] = &[matched_gamut, gamut_from_transfer];

fn matched_gamut(ev: &Evidence) -> Option<(Gamut, GamutSource)> {
    first_match(GAMUT_RULES, &ev.haystack).map(|g| (g, GamutSource::Matched))
}

fn gamut_from_transfer(ev: &Evidence) -> Option<(Gamut, GamutSource)> {
    if ev.has_color_tags {
        return None;
    }
    let gamut = match ev.tagged_transfer {
        Some(TransferFunction::Pq) => Gamut::P3,
        Some(TransferFunction::Hlg) | None => Gamut::Bt2020,
    };
    Some((gamut, GamutSource::DefaultedFromTransfer))
}

fn gamut_catch_all(_: &Evidence) -> (Gamut, GamutSource) {
    (Gamut::Bt2020, GamutSource::UnrecognizedTags)
}

/// Resolve a concrete transfer function and gamut for `descriptor`.
pub fn infer(descriptor: &AssetDescriptor) -> ColorDecision {
    let transfer_text = descriptor
        .transfer_tag
        .as_deref()
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let tagged_transfer = first_match(TRANSFER_RULES, &transfer_text);
    let (transfer, transfer_source) = match tagged_transfer {
        Some(tf) => (tf, TransferSource::Tagged),
        None => (TransferFunction::Hlg, TransferSource::Defaulted),
    };

    let tags: Vec<&str> = descriptor.color_tags.present().collect();
    let has_color_tags = !tags.is_empty();
    let haystack = if has_color_tags {
        tags.join(" ").to_ascii_lowercase()
    } else {
        transfer_text
    };
    let evidence = Evidence {
        haystack,
        has_color_tags,
        tagged_transfer,
    };

    let (gamut, gamut_source) = GAMUT_TIERS
        .iter()
        .find_map(|tier| tier(&evidence))
        .unwrap_or_else(|| gamut_catch_all(&evidence));

    let decision = ColorDecision {
        transfer,
        gamut,
        gamut_code: gamut.code(),
        had_explicit_color_info: has_color_tags,
        transfer_source,
        gamut_source,
    };
    for w in decision.warnings() {
        warn!("{}: {w}", descriptor.path.display());
    }
    decision
}
