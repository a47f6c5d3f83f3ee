/// Width/height ratio at or below which an image gets the large card.
const LARGE_MAX_RATIO: f64 = 1.0 / 1.1;
/// Width/height ratio at or below which an image gets the medium card.
const MEDIUM_MAX_RATIO: f64 = 1.0 / 1.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LayoutClass {
    #[default]
    Small,
    Medium,
    Large,
}

impl LayoutClass {
    /// Class a card keeps until (or unless) its image is classified.
    pub const FALLBACK: LayoutClass = LayoutClass::Small;

    pub fn as_str(&self) -> &'static str {
        match self {
            LayoutClass::Small => "small",
            LayoutClass::Medium => "medium",
            LayoutClass::Large => "large",
        }
    }

    /// Image rows a card of this class reserves in the feed.
    pub fn image_rows(&self) -> u16 {
        match self {
            LayoutClass::Small => 4,
            LayoutClass::Medium => 7,
            LayoutClass::Large => 10,
        }
    }
}

/// Maps natural pixel dimensions to a card size. Thresholds are checked in
/// order and the first match wins.
///
/// The `Medium` branch can never fire: every ratio at or below
/// `MEDIUM_MAX_RATIO` is already at or below `LARGE_MAX_RATIO`. Only `Large`
/// (portrait-ish, ratio <= ~0.909) and `Small` are reachable.
pub fn classify(natural_width: u32, natural_height: u32) -> LayoutClass {
    let ratio = f64::from(natural_width) / f64::from(natural_height);
    if ratio <= LARGE_MAX_RATIO {
        LayoutClass::Large
    } else if ratio <= MEDIUM_MAX_RATIO {
        LayoutClass::Medium
    } else {
        LayoutClass::Small
    }
}

/// Per-image layout annotation. Assigned at most once per image instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayoutSlot {
    #[default]
    Pending,
    Assigned(LayoutClass),
}

impl LayoutSlot {
    /// Classifies and stores the result on the first call with usable
    /// dimensions. Returns the newly assigned class, or `None` when the slot
    /// was already assigned or a dimension is zero.
    pub fn assign(&mut self, natural_width: u32, natural_height: u32) -> Option<LayoutClass> {
        if let LayoutSlot::Assigned(_) = self {
            return None;
        }
        if natural_width == 0 || natural_height == 0 {
            return None;
        }
        let class = classify(natural_width, natural_height);
        *self = LayoutSlot::Assigned(class);
        Some(class)
    }

    pub fn class(&self) -> LayoutClass {
        match self {
            LayoutSlot::Pending => LayoutClass::FALLBACK,
            LayoutSlot::Assigned(class) => *class,
        }
    }

    pub fn is_assigned(&self) -> bool {
        matches!(self, LayoutSlot::Assigned(_))
    }
}
