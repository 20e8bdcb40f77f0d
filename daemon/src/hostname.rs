/// Name of the machine this process runs on, or `"localhost"` if the system
/// will not say.
pub fn local_hostname() -> String {
    ::hostname::get()
        .ok()
        .map(|h| h.to_string_lossy().trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
