/// WebSocket URL the provider should stream a call's audio to
///
/// `public_url` is the externally reachable base of this service; an
/// `https`/`http` scheme becomes `wss`/`ws`, and a bare host gets `wss`.
pub fn media_stream_url(public_url: &str, scenario_id: &str) -> String {
    let base = public_url.trim_end_matches('/');
    let base = if let Some(host) = base.strip_prefix("https://") {
        format!("wss://{}", host)
    } else if let Some(host) = base.strip_prefix("http://") {
        format!("ws://{}", host)
    } else if base.starts_with("wss://") || base.starts_with("ws://") {
        base.to_string()
    } else {
        format!("wss://{}", base)
    };
    format!("{}/media-stream/{}", base, scenario_id)
}

/// TwiML answering a call by connecting it to our media stream
pub fn connect_stream_twiml(public_url: &str, scenario_id: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <Response><Connect><Stream url=\"{}\"/></Connect></Response>",
        xml_escape(&media_stream_url(public_url, scenario_id))
    )
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
