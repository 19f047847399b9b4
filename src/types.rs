/*
 * Platform-agnostic value types shared by the overlay engine. Identifiers are
 * plain copyable handles into registries owned elsewhere (the application owns
 * hosts and anchors, the controller owns popovers and layers), so holding one
 * never keeps the referenced object alive.
 */

/// Logical identifier of a host window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostId(pub u32);

/// Logical identifier of an anchor element inside a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnchorId(pub u32);

/// Identifier of a node in the host's visual tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VisualId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PopoverId(pub(crate) u64);

impl PopoverId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/*
 * Names one popover slot on one host's overlay layer. The id part is only
 * unique within the layer, so the host is carried along.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentHandle {
    pub(crate) host: HostId,
    pub(crate) id: u64,
}

impl AttachmentHandle {
    pub fn host(&self) -> HostId {
        self.host
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned rectangle in host coordinates (origin top-left, y grows downward).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// Horizontal placement of the overlay relative to its anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HorizontalAlignment {
    #[default]
    Left,
    Center,
    Right,
    Stretch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PopoverState {
    #[default]
    Closed,
    Opening,
    Open,
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChangeKind {
    Opened,
    Closed,
}

/// Published once a popover has fully settled in `Open` or `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopoverStateChangedEvent {
    pub kind: StateChangeKind,
    pub popover: PopoverId,
    pub host: HostId,
}

/// Outcome of a popover's close policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CloseDecision {
    #[default]
    Proceed,
    Veto,
}

/// Where a re-layout notification originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutSource {
    Host,
    Anchor(AnchorId),
}

/*
 * Request raised by window chrome when the user asks to close a host window.
 * Any listener may cancel it before the owner acts on it.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClosingWindowRequest {
    cancelled: bool,
}

impl ClosingWindowRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}
