pub mod claude;
pub mod gemini;
pub mod traits;

pub use traits::TargetDescriptor;

/// Get a site descriptor by key
pub fn get_site(key: &str) -> Option<TargetDescriptor> {
    match key {
        claude::KEY => Some(claude::descriptor()),
        gemini::KEY => Some(gemini::descriptor()),
        _ => None,
    }
}

/// The two relayed sites, in relay order
pub fn all_sites() -> Vec<TargetDescriptor> {
    vec![claude::descriptor(), gemini::descriptor()]
}
