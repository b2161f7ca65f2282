/// Keys the session reacts to, independent of the windowing backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKey {
    Space,
    Left,
    Right,
    /// Reports a felt vibration.
    Up,
    Escape,
}
