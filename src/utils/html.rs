/// Clean admin-entered text using the ammonia library.
///
/// Whitelist-based: safe inline tags survive, `<script>` and friends are
/// stripped along with event-handler attributes. Applied to topic and chapter
/// text before it is stored.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}
