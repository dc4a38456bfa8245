//! Module-loading bootstrap shipped in runtime chunks.
//!
//! Chunks register themselves by pushing `[names, factories, entries,
//! requires]` onto the global `self.__plinth_chunks` queue. The runtime
//! drains whatever was queued before it loaded, then intercepts `push`.
//! Entries run once every chunk they require has registered.

use serde::Serialize;
use std::collections::BTreeMap;

/// Module require function passed to every factory.
pub const REQUIRE: &str = "__plinth_require";

/// Global chunk queue property. Shared by all artifacts of a build, so it is
/// never renamed.
pub const CHUNK_QUEUE: &str = "__plinth_chunks";

/// Prefix of every identifier the pipeline introduces.
pub const IDENT_PREFIX: &str = "__plinth_";

/// Preferred short forms of pipeline identifiers. The minifier falls back to
/// a generated name when an artifact already uses the short form.
pub const SHORT_NAMES: &[(&str, &str)] = &[
    ("__plinth_require", "$r"),
    ("__plinth_default", "$d"),
    ("__plinth_css", "$c"),
    ("__plinth_style", "$s"),
];

const TEMPLATE: &str = r#"(function () {
  var queue = self.__plinth_chunks = self.__plinth_chunks || [];
  if (queue.installed) {
    queue.push([[__NAME__], {}]);
    return;
  }
  queue.installed = true;
  var chunkFiles = __CHUNK_FILES__;
  var cssFiles = __CSS_FILES__;
  var publicPath = __PUBLIC_PATH__;
  var modules = {};
  var cache = {};
  var registered = {};
  var loading = {};
  var pending = [];
  var has = Object.prototype.hasOwnProperty;

  function __plinth_require(id) {
    var cached = cache[id];
    if (cached) return cached.exports;
    var factory = modules[id];
    if (!factory) throw new Error("Cannot find module '" + id + "'");
    var module = cache[id] = { exports: {} };
    factory.call(module.exports, module, module.exports, __plinth_require);
    return module.exports;
  }
  __plinth_require.d = function (exports, getters) {
    for (var key in getters) {
      if (has.call(getters, key) && !has.call(exports, key)) {
        Object.defineProperty(exports, key, { enumerable: true, get: getters[key] });
      }
    }
  };
  __plinth_require.r = function (exports, source) {
    Object.keys(source).forEach(function (key) {
      if (key !== "default" && !has.call(exports, key)) {
        Object.defineProperty(exports, key, { enumerable: true, get: function () { return source[key]; } });
      }
    });
  };
  __plinth_require.m = function (exports) {
    Object.defineProperty(exports, "__esModule", { value: true });
  };
  __plinth_require.n = function (exports) {
    return exports && exports.__esModule ? exports : { "default": exports };
  };
  __plinth_require.e = function (names) {
    return Promise.all(names.map(load));
  };
  __plinth_require.x = function (name) {
    if (typeof require === "function") return require(name);
    if (name in self) return self[name];
    throw new Error("External module '" + name + "' is not available");
  };

  function load(name) {
    if (registered[name]) return Promise.resolve();
    if (loading[name]) return loading[name].promise;
    var entry = loading[name] = {};
    entry.promise = new Promise(function (resolve, reject) {
      entry.resolve = resolve;
      var script = document.createElement("script");
      script.src = publicPath + chunkFiles[name];
      script.onerror = function () {
        delete loading[name];
        reject(new Error("Loading chunk " + name + " failed"));
      };
      document.head.appendChild(script);
      if (cssFiles[name]) {
        var link = document.createElement("link");
        link.rel = "stylesheet";
        link.href = publicPath + cssFiles[name];
        document.head.appendChild(link);
      }
    });
    return entry.promise;
  }

  function ready(names) {
    for (var i = 0; i < names.length; i++) {
      if (!registered[names[i]]) return false;
    }
    return true;
  }

  function register(data) {
    var names = data[0];
    var factories = data[1];
    for (var id in factories) {
      if (has.call(factories, id)) modules[id] = factories[id];
    }
    for (var i = 0; i < names.length; i++) {
      registered[names[i]] = true;
      if (loading[names[i]]) loading[names[i]].resolve();
    }
    if (data[2] && data[2].length) pending.push([data[3] || [], data[2]]);
    for (var j = 0; j < pending.length; j++) {
      var job = pending[j];
      if (ready(job[0])) {
        pending.splice(j--, 1);
        job[1].forEach(__plinth_require);
      }
    }
  }

  register([[__NAME__], {}]);
  queue.forEach(register);
  queue.push = register;
})();
"#;

/// Source of a runtime chunk.
///
/// `chunk_files` and `css_files` map loadable chunk names to output paths
/// relative to `public_path`.
#[must_use]
pub fn runtime_source(
    name: &str,
    chunk_files: &BTreeMap<String, String>,
    css_files: &BTreeMap<String, String>,
    public_path: &str,
) -> String {
    TEMPLATE
        .replace("__NAME__", &json(name))
        .replace("__CHUNK_FILES__", &json(chunk_files))
        .replace("__CSS_FILES__", &json(css_files))
        .replace("__PUBLIC_PATH__", &json(public_path))
}

/// Strings and string maps always serialize.
fn json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_embeds_maps() {
        let mut files = BTreeMap::new();
        files.insert("lazy".to_string(), "js/lazy.1234abcd.chunk.js".to_string());
        let src = runtime_source("runtime", &files, &BTreeMap::new(), "/static/");

        assert!(src.contains(r#"var chunkFiles = {"lazy":"js/lazy.1234abcd.chunk.js"};"#));
        assert!(src.contains(r#"var publicPath = "/static/";"#));
        assert!(src.contains(r#"register([["runtime"], {}]);"#));
        assert!(!src.contains("__NAME__"));
    }

    #[test]
    fn test_short_names_are_prefixed_and_unique() {
        let mut shorts: Vec<&str> = SHORT_NAMES.iter().map(|(_, s)| *s).collect();
        shorts.sort_unstable();
        shorts.dedup();
        assert_eq!(shorts.len(), SHORT_NAMES.len());
        assert!(SHORT_NAMES.iter().all(|(long, _)| long.starts_with(IDENT_PREFIX)));
        assert!(SHORT_NAMES.iter().all(|(long, _)| *long != CHUNK_QUEUE));
    }
}
