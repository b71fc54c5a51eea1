//! DOM scripts executed inside render sessions
//!
//! Scripts are function bodies in the WebDriver `execute/sync` convention:
//! inputs arrive through `arguments`, the result through `return`.

/// `arguments`: [row_selector]. Returns true once a row element exists.
pub const ROW_PRESENT: &str = r#"return document.querySelector(arguments[0]) !== null;"#;

/// `arguments`: [row_selector, target_offset].
///
/// Walks up from the first row to the nearest ancestor whose computed
/// overflow makes it the real scroll region and sets its scrollTop.
/// Falls back to scrolling the window. Returns "container", "window"
/// or "no-row".
pub const POSITION_VIEW: &str = r#"
const rowSelector = arguments[0];
const target = arguments[1];
const row = document.querySelector(rowSelector);
if (!row) return "no-row";

let el = row.parentElement;
while (el) {
    const style = window.getComputedStyle(el);
    const scrollable = el.scrollHeight > el.clientHeight;
    const overflowing = style.overflowY === "auto"
        || style.overflowY === "scroll"
        || style.overflow === "auto";
    if (scrollable && overflowing) {
        el.scrollTop = target;
        return "container";
    }
    el = el.parentElement;
}
window.scrollTo(0, target);
return "window";
"#;

/// `arguments`: [row_selector, cell_selector, columns].
///
/// Returns the visible rows in document order as
/// `{symbol, issuer, price, volume, change}` objects. Rows without cells
/// or without a symbol are dropped.
pub const EXTRACT_ROWS: &str = r#"
const rowSelector = arguments[0];
const cellSelector = arguments[1];
const cols = arguments[2];
const rows = Array.from(document.querySelectorAll(rowSelector));
return rows.map(row => {
    const cells = Array.from(row.querySelectorAll(cellSelector));
    if (cells.length === 0) return null;
    const text = i => {
        const cell = cells[i];
        return cell && cell.innerText ? cell.innerText.trim() : "";
    };
    return {
        symbol: text(cols.symbol),
        issuer: text(cols.issuer),
        price: text(cols.price),
        volume: text(cols.volume),
        change: text(cols.change),
    };
}).filter(item => item !== null && item.symbol !== "");
"#;
