mod toy;

use std::io;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

use glue_js::{ClosureKind, HostImports, HostValue, Intrinsic};
use toy::Toy;

#[derive(Clone, Default)]
struct SharedWriter {
  buffer: Arc<Mutex<Vec<u8>>>,
}

impl SharedWriter {
  fn into_inner(self) -> Vec<u8> {
    match Arc::try_unwrap(self.buffer) {
      Ok(buffer) => buffer.into_inner().unwrap(),
      Err(arc) => arc.lock().unwrap().clone(),
    }
  }
}

struct SharedWriterGuard<'a> {
  buffer: &'a Arc<Mutex<Vec<u8>>>,
}

impl<'a> io::Write for SharedWriterGuard<'a> {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.buffer.lock().unwrap().extend_from_slice(buf);
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

impl<'a> MakeWriter<'a> for SharedWriter {
  type Writer = SharedWriterGuard<'a>;

  fn make_writer(&'a self) -> Self::Writer {
    SharedWriterGuard {
      buffer: &self.buffer,
    }
  }
}

#[test]
fn bridge_activity_is_traced_by_target() {
  let writer = SharedWriter::default();
  let subscriber = tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_ansi(false)
    .with_writer(writer.clone())
    .finish();
  let _guard = tracing::subscriber::set_default(subscriber);

  let mut toy = Toy::new(HostImports::new());
  toy.link(&["not_provided"]);
  let h = toy.closure(ClosureKind::Shared);
  let f = toy.value(h);
  toy.bridge.invoke(&f, &[HostValue::Number(1.0)]).unwrap();
  toy.call(Intrinsic::CbDrop.name(), &[h.into()]).unwrap();
  let _ = toy.call(Intrinsic::ObjectDropRef.name(), &[h.into()]);
  toy.bridge.dispose();

  drop(_guard);
  let output = String::from_utf8(writer.into_inner()).unwrap();
  for expected in [
    "glue_js::bridge",
    "glue_js::dispatch",
    "glue_js::closure",
    "host does not provide import",
    "bridge poisoned",
  ] {
    assert!(
      output.contains(expected),
      "expected {expected:?} in trace output, got: {output}"
    );
  }
  assert!(
    output.contains("__wbindgen_cb_drop"),
    "expected the dispatch span to name the import, got: {output}"
  );
}
