//! Source text evaluated on every new document, before any page script
//! runs. Wraps the `document.cookie` accessor and the local-storage object
//! so each write is captured together with an origin-local call stack and
//! forwarded through the `reportEvent` binding. Reads and every other
//! member pass through to the original objects, bound to them so `this`
//! stays correct.
//!
//! Stack capture is offline: frames are parsed out of `new Error().stack`
//! in-page, with no symbolication or network access. Frame 0 of the
//! reported stack is the interceptor's own wrapper; the bridge trims it.

/// Name of the binding the host exposes into every page context.
pub const BINDING_NAME: &str = "reportEvent";

/// Injected via `Page.addScriptToEvaluateOnNewDocument`, so it re-installs
/// on every navigation within the session.
pub const INSTRUMENT_SOURCE: &str = r##"
(() => {
  if (window.__evidenceInstrumented) {
    return;
  }
  window.__evidenceInstrumented = true;

  const parseFrame = (line) => {
    const text = line.trim().replace(/^at\s+/, '');
    const frame = { source: text };
    let site = text;
    const named = text.match(/^([^(]+?)\s+\((.*)\)$/);
    if (named) {
      frame.functionName = named[1];
      site = named[2];
    }
    const loc = site.match(/^(.*?):(\d+):(\d+)$/);
    if (loc) {
      frame.fileName = loc[1];
      frame.lineNumber = parseInt(loc[2], 10);
      frame.columnNumber = parseInt(loc[3], 10);
    } else {
      frame.fileName = site;
    }
    return frame;
  };

  // Drop the Error header line and captureStack's own frame, so frame 0 is
  // the intercepting wrapper and frame 1 the direct caller.
  const captureStack = () => {
    const lines = (new Error().stack || '').split('\n').slice(2, 12);
    return lines.map(parseFrame);
  };

  const report = (type, stack, data) => {
    try {
      window.reportEvent(JSON.stringify({
        type: type,
        stack: stack,
        data: data,
        location: {
          href: window.location.href,
          origin: window.location.origin,
          hostname: window.location.hostname,
          pathname: window.location.pathname,
          ancestor: (window.location.ancestorOrigins && window.location.ancestorOrigins[0]) || null,
        },
      }));
    } catch (err) {
      // The binding may be gone during teardown; never break the page.
    }
  };

  const cookieDescriptor = Object.getOwnPropertyDescriptor(Document.prototype, 'cookie');
  Object.defineProperty(document, 'cookie', {
    get() {
      return cookieDescriptor.get.call(this);
    },
    set(value) {
      report('Cookie.JS', captureStack(), String(value));
      return cookieDescriptor.set.call(this, value);
    },
    enumerable: true,
    configurable: true,
  });

  const origStorage = window.localStorage;
  Object.defineProperty(window, 'localStorage', {
    configurable: true,
    enumerable: true,
    value: new Proxy(origStorage, {
      set(ls, prop, value) {
        const entry = {};
        entry[prop] = String(value);
        report('Storage.LocalStorage', captureStack(), entry);
        ls[prop] = value;
        return true;
      },
      get(ls, prop) {
        // Explicit per-member dispatch: setItem is the only intercepted
        // member, everything else passes through bound to the original
        // object so method calls keep their `this`.
        if (prop === 'setItem') {
          return (...args) => {
            const entry = {};
            entry[String(args[0])] = String(args[1]);
            report('Storage.LocalStorage', captureStack(), entry);
            return ls.setItem.apply(ls, args);
          };
        }
        const member = ls[prop];
        if (typeof member === 'function') {
          return member.bind(ls);
        }
        return member;
      },
    }),
  });
})();
"##;
