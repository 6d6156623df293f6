/// Channel registry for the PurpleAir particulate source.
///
/// Describes the averaging windows a station reports in its `Stats`
/// object. This is the single source of truth for what each channel key
/// means; the `ChannelTag` enum in `model` only names them.

use crate::model::ChannelTag;

// ---------------------------------------------------------------------------
// Channel metadata
// ---------------------------------------------------------------------------

/// Metadata for one PurpleAir averaging window.
pub struct Channel {
    pub tag: ChannelTag,
    /// Human-readable window name.
    pub name: &'static str,
}

/// All channels, in the order the vendor lists them.
pub static CHANNEL_REGISTRY: &[Channel] = &[
    Channel { tag: ChannelTag::Realtime, name: "realtime" },
    Channel { tag: ChannelTag::ShortTerm, name: "short-term" },
    Channel { tag: ChannelTag::ThirtyMinute, name: "30-min-avg" },
    Channel { tag: ChannelTag::OneHour, name: "1-hr-avg" },
    Channel { tag: ChannelTag::SixHour, name: "6-hr-avg" },
    Channel { tag: ChannelTag::OneDay, name: "24-hr-avg" },
    Channel { tag: ChannelTag::OneWeek, name: "1-week-avg" },
];

/// The channel whose hour-over-hour AQI change is published as the trend.
pub const TREND_CHANNEL: ChannelTag = ChannelTag::ShortTerm;

/// Looks up a channel by tag. Every tag has an entry.
fn find_channel(tag: ChannelTag) -> Option<&'static Channel> {
    CHANNEL_REGISTRY.iter().find(|c| c.tag == tag)
}

/// Human-readable name of a channel, falling back to its vendor key.
pub fn channel_name(tag: ChannelTag) -> &'static str {
    find_channel(tag).map(|c| c.name).unwrap_or(tag.key())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
