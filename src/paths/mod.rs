/**
 * Paths Module
 *
 * Where FrameNote keeps its config file and local state database.
 */
mod app_dirs;

pub use app_dirs::*;
