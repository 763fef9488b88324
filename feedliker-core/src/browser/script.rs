use std::collections::BTreeSet;

const LIKE_ROUTINE_TEMPLATE: &str = r##"
(async () => {
  const blocklist = __BLOCKLIST__;
  const spacing = __SPACING__;
  const pause = (ms) => new Promise(r => setTimeout(r, ms));
  const tab = document.querySelector("#tab_menu_friend > div.qz-main");
  if (tab) { tab.click(); }
  await pause(1500);
  const selector = "a.item.qz_like_btn_v3:not(.item-on) > i";
  const authorOf = (btn) => {
    const card = btn.parentElement?.parentElement?.parentElement?.parentElement;
    const header = card?.previousElementSibling?.previousElementSibling;
    const link = header?.querySelector(".f-nick > a");
    return link ? parseInt(link.href.split('/').pop(), 10) : NaN;
  };
  let emptyPasses = 0;
  let liked = 0;
  while (emptyPasses <= 3) {
    const buttons = Array.from(document.querySelectorAll(selector))
      .filter(btn => !blocklist.includes(authorOf(btn)));
    if (buttons.length === 0) {
      emptyPasses++;
    } else {
      emptyPasses = 0;
      for (const btn of buttons) {
        btn.click();
        liked++;
        await pause(spacing);
      }
    }
    window.scrollBy({ top: 1000, behavior: 'smooth' });
    await pause(1500);
  }
  return liked;
})()
"##;

/// Page-side like pass: clicks every unliked post whose author is not
/// blocklisted and resolves to the number of clicks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikeRoutine {
    blocklist: BTreeSet<u64>,
    spacing_ms: u64,
}

impl LikeRoutine {
    pub fn new(blocklist: BTreeSet<u64>, spacing_ms: u64) -> Self {
        Self {
            blocklist,
            spacing_ms,
        }
    }

    pub fn blocklist(&self) -> &BTreeSet<u64> {
        &self.blocklist
    }

    pub fn spacing_ms(&self) -> u64 {
        self.spacing_ms
    }

    pub fn excludes(&self, author: u64) -> bool {
        self.blocklist.contains(&author)
    }

    pub fn script(&self) -> String {
        let ids = self
            .blocklist
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        LIKE_ROUTINE_TEMPLATE
            .replace("__BLOCKLIST__", &format!("[{ids}]"))
            .replace("__SPACING__", &self.spacing_ms.to_string())
    }
}

pub const SCROLL_TO_TOP: &str = "window.scrollTo(0, 0);";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_embeds_blocklist_and_spacing() {
        let routine = LikeRoutine::new([10010, 10000].into_iter().collect(), 2500);
        let script = routine.script();
        assert!(script.contains("const blocklist = [10000, 10010];"));
        assert!(script.contains("const spacing = 2500;"));
        assert!(!script.contains("__"));
    }

    #[test]
    fn empty_blocklist_renders_empty_array() {
        let routine = LikeRoutine::new(BTreeSet::new(), 3000);
        assert!(routine.script().contains("const blocklist = [];"));
        assert!(!routine.excludes(10000));
    }

    #[test]
    fn script_keeps_friend_tab_selector_intact() {
        let script = LikeRoutine::new(BTreeSet::new(), 3000).script();
        assert!(script.contains(r##"querySelector("#tab_menu_friend > div.qz-main")"##));
        assert!(script.trim_end().ends_with("})()"));
    }
}
