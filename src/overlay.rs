//! Page-side overlay, delivered as an opaque script blob.
//!
//! The overlay is foreign-language payload, not application code: it is a
//! self-contained IIFE parameterized by exactly one knob, the annotation
//! service port. The Rust side only relies on the contract constants below.

/// Double-load guard set by the script on first injection.
pub const LOADED_FLAG: &str = "__pagelensOverlayLoaded";
/// Page global that re-renders annotation badges from the service.
pub const REFRESH_GLOBAL: &str = "__pagelensRefreshBadges";
/// Page global that displays the processing state (`idle`/`processing`/`done`).
pub const PROCESSING_GLOBAL: &str = "__pagelensSetProcessing";
/// Attribute marking overlay UI; such elements are never annotation targets.
pub const UI_ATTR: &str = "data-pagelens-ui";

const PORT_PLACEHOLDER: &str = "__PAGELENS_PORT__";

/// Produce the overlay script for a given annotation-service port.
pub fn build_script(port: u16) -> String {
    OVERLAY_JS.replace(PORT_PLACEHOLDER, &port.to_string())
}

const OVERLAY_JS: &str = r#"(() => {
  'use strict';
  const PORT = __PAGELENS_PORT__;
  const BASE = 'http://127.0.0.1:' + PORT;

  if (window.__pagelensOverlayLoaded) {
    if (typeof window.__pagelensRefreshBadges === 'function') {
      window.__pagelensRefreshBadges();
    }
    return;
  }
  window.__pagelensOverlayLoaded = true;

  let armed = false;
  let annotations = [];

  const root = document.createElement('div');
  root.setAttribute('data-pagelens-ui', '');
  root.style.cssText =
    'position:fixed;z-index:2147483646;top:0;left:0;width:0;height:0;' +
    'font-family:system-ui,sans-serif;font-size:13px;';
  (document.body || document.documentElement).appendChild(root);

  const panel = document.createElement('div');
  panel.setAttribute('data-pagelens-ui', '');
  panel.style.cssText =
    'position:fixed;bottom:16px;right:16px;display:flex;gap:8px;' +
    'align-items:center;background:#1e1e2e;color:#cdd6f4;padding:8px 10px;' +
    'border-radius:8px;box-shadow:0 4px 14px rgba(0,0,0,.35);';
  root.appendChild(panel);

  const makeButton = (label) => {
    const b = document.createElement('button');
    b.setAttribute('data-pagelens-ui', '');
    b.textContent = label;
    b.style.cssText =
      'background:#313244;color:inherit;border:0;border-radius:6px;' +
      'padding:4px 10px;cursor:pointer;font:inherit;';
    panel.appendChild(b);
    return b;
  };

  const armButton = makeButton('Annotate');
  const sendButton = makeButton('Send (0)');
  const statusChip = document.createElement('span');
  statusChip.setAttribute('data-pagelens-ui', '');
  statusChip.style.cssText = 'min-width:0;opacity:.8;';
  panel.appendChild(statusChip);

  const badgeLayer = document.createElement('div');
  badgeLayer.setAttribute('data-pagelens-ui', '');
  root.appendChild(badgeLayer);

  // ── selectors ──────────────────────────────────────────────────────

  const cssEscape = (s) =>
    (window.CSS && CSS.escape) ? CSS.escape(s) : s.replace(/[^a-zA-Z0-9_-]/g, '\\$&');

  function selectorFor(el) {
    if (el.id) {
      return { selector: '#' + cssEscape(el.id), confidence: 'stable' };
    }
    const testId = el.getAttribute('data-testid');
    if (testId) {
      return {
        selector: '[data-testid="' + testId.replace(/"/g, '\\"') + '"]',
        confidence: 'stable',
      };
    }
    const parts = [];
    let node = el;
    while (node && node.nodeType === 1 && node !== document.body && parts.length < 6) {
      const tag = node.tagName.toLowerCase();
      let index = 1;
      let sibling = node;
      while ((sibling = sibling.previousElementSibling)) {
        if (sibling.tagName === node.tagName) index += 1;
      }
      parts.unshift(tag + ':nth-of-type(' + index + ')');
      node = node.parentElement;
    }
    return { selector: parts.join(' > '), confidence: 'fragile' };
  }

  function reactSourceFor(el) {
    for (const key of Object.keys(el)) {
      if (!key.startsWith('__reactFiber$')) continue;
      let fiber = el[key];
      while (fiber) {
        const type = fiber.type;
        if (typeof type === 'function') {
          const out = { component: type.displayName || type.name || 'Anonymous' };
          const src = fiber._debugSource;
          if (src && src.fileName) {
            out.source = src.fileName + ':' + (src.lineNumber || 0);
          }
          return out;
        }
        fiber = fiber.return;
      }
    }
    return null;
  }

  // ── service calls ──────────────────────────────────────────────────

  async function api(method, path, body) {
    const resp = await fetch(BASE + path, {
      method,
      headers: body ? { 'Content-Type': 'application/json' } : {},
      body: body ? JSON.stringify(body) : undefined,
    });
    if (!resp.ok) throw new Error(method + ' ' + path + ' -> ' + resp.status);
    return resp.status === 204 ? null : resp.json();
  }

  async function refresh() {
    try {
      annotations = await api('GET', '/annotations');
    } catch (e) {
      annotations = [];
    }
    renderBadges();
  }

  function renderBadges() {
    badgeLayer.textContent = '';
    const open = annotations.filter((a) => a.status === 'open');
    sendButton.textContent = 'Send (' + open.length + ')';
    for (const ann of open) {
      let x = 24, y = 24;
      if (ann.anchorPoint) {
        x = ann.anchorPoint.x;
        y = ann.anchorPoint.y;
      } else {
        try {
          const el = document.querySelector(ann.selector);
          if (el) {
            const r = el.getBoundingClientRect();
            x = r.left + r.width / 2;
            y = r.top;
          }
        } catch (e) { /* stale selector */ }
      }
      const pin = document.createElement('div');
      pin.setAttribute('data-pagelens-ui', '');
      pin.setAttribute('data-pagelens-badge', ann.id);
      pin.title = ann.text;
      pin.textContent = '📌';
      pin.style.cssText =
        'position:fixed;left:' + (x - 10) + 'px;top:' + (y - 10) +
        'px;cursor:pointer;filter:drop-shadow(0 1px 2px rgba(0,0,0,.5));';
      pin.addEventListener('click', async (ev) => {
        ev.stopPropagation();
        if (window.confirm('Delete this annotation?\n\n' + ann.text)) {
          try { await api('DELETE', '/annotations/' + ann.id); } catch (e) {}
          refresh();
        }
      });
      badgeLayer.appendChild(pin);
    }
  }

  // ── annotate mode ──────────────────────────────────────────────────

  function setArmed(on) {
    armed = on;
    armButton.style.background = on ? '#89b4fa' : '#313244';
    armButton.style.color = on ? '#11111b' : '';
    document.documentElement.style.cursor = on ? 'crosshair' : '';
  }

  armButton.addEventListener('click', () => setArmed(!armed));

  document.addEventListener(
    'click',
    async (ev) => {
      if (!armed) return;
      const el = ev.target;
      if (!(el instanceof Element) || el.closest('[data-pagelens-ui]')) return;
      ev.preventDefault();
      ev.stopPropagation();
      setArmed(false);

      const text = window.prompt('Feedback for this element:');
      if (!text) return;

      const rect = el.getBoundingClientRect();
      const sel = selectorFor(el);
      const body = {
        url: location.href,
        selector: sel.selector,
        selectorConfidence: sel.confidence,
        text,
        viewport: { width: window.innerWidth, height: window.innerHeight },
        elementRect: { x: rect.x, y: rect.y, width: rect.width, height: rect.height },
        anchorPoint: { x: ev.clientX, y: ev.clientY },
      };
      const react = reactSourceFor(el);
      if (react) body.reactSource = react;

      try {
        await api('POST', '/annotations', body);
      } catch (e) {
        console.warn('pagelens: annotation rejected', e);
      }
      refresh();
    },
    true
  );

  sendButton.addEventListener('click', async () => {
    try {
      await api('POST', '/annotations/send');
      statusChip.textContent = 'Sent';
    } catch (e) {
      statusChip.textContent = 'Send failed';
    }
  });

  // ── processing state ───────────────────────────────────────────────

  let doneTimer = null;
  window.__pagelensSetProcessing = (state) => {
    if (doneTimer) { clearTimeout(doneTimer); doneTimer = null; }
    if (state === 'processing') {
      statusChip.textContent = 'Processing…';
    } else if (state === 'done') {
      statusChip.textContent = '✓ Done';
      refresh();
      doneTimer = setTimeout(() => {
        statusChip.textContent = '';
      }, 1600);
    } else {
      statusChip.textContent = '';
    }
  };

  window.__pagelensRefreshBadges = refresh;

  window.addEventListener('scroll', renderBadges, { passive: true });
  window.addEventListener('resize', renderBadges, { passive: true });

  refresh();
})();
"#;

/// Removes one annotation's badge from the page. The id must already be
/// sanitized ([a-f0-9-]) by the caller.
pub fn remove_badge_script(annotation_id: &str) -> String {
    format!(
        "document.querySelectorAll('[data-pagelens-badge=\"{annotation_id}\"]')\
         .forEach((el) => el.remove())"
    )
}

/// Best-effort processing-state push through the page global.
pub fn set_processing_script(state: &str) -> String {
    format!(
        "typeof window.{PROCESSING_GLOBAL} === 'function' \
         && window.{PROCESSING_GLOBAL}('{state}')"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_embeds_the_port() {
        let script = build_script(9224);
        assert!(script.contains("const PORT = 9224;"));
        assert!(!script.contains(PORT_PLACEHOLDER));
    }

    #[test]
    fn script_carries_the_contract_surface() {
        let script = build_script(9223);
        assert!(script.contains(LOADED_FLAG));
        assert!(script.contains(REFRESH_GLOBAL));
        assert!(script.contains(PROCESSING_GLOBAL));
        assert!(script.contains(UI_ATTR));
    }

    #[test]
    fn reinjection_path_refreshes_and_returns() {
        let script = build_script(9223);
        let guard = script.find("if (window.__pagelensOverlayLoaded)").unwrap();
        let create = script.find("createElement").unwrap();
        assert!(guard < create, "guard must run before any UI is created");
    }

    #[test]
    fn processing_push_checks_for_the_global() {
        let js = set_processing_script("done");
        assert!(js.contains("__pagelensSetProcessing"));
        assert!(js.contains("'done'"));
        assert!(js.starts_with("typeof"));
    }

    #[test]
    fn badge_removal_targets_one_id() {
        let js = remove_badge_script("abc-123");
        assert!(js.contains("data-pagelens-badge=\"abc-123\""));
    }
}
