//! Operating-system backends for the platform seam.

pub mod windows;
