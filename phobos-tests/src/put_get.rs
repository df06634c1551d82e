//! Round-trips an object through `put`/`get` against two `dir` drives.

use anyhow::{ensure, Context};
use phobos::adapters::fake::FakeIo;
use phobos::model::MediumFamily;
use phobos::store::{InProcessClient, Store};

pub fn run() -> anyhow::Result<()> {
    let dir = tempfile::tempdir().context("creating scratch dir for fake extent files")?;
    let original = std::env::current_dir()?;
    std::env::set_current_dir(dir.path())?;
    let result = run_in();
    std::env::set_current_dir(original)?;
    result
}

fn run_in() -> anyhow::Result<()> {
    let mut scheduler = crate::fixture::build(2, 1 << 20);
    let store = Store::new();
    let mut io = FakeIo::new();
    let data = b"a small object round-tripped through phobos-tests".to_vec();

    {
        let mut client = InProcessClient::new(&mut scheduler);
        store
            .put(&mut client, &mut io, "obj-roundtrip", MediumFamily::Dir, 2, vec![], &data)
            .context("put failed")?;
    }

    let read_back = {
        let mut client = InProcessClient::new(&mut scheduler);
        store.get(&mut client, &mut io, "obj-roundtrip").context("get failed")?
    };

    ensure!(read_back == data, "read back {} bytes, expected {}", read_back.len(), data.len());
    println!("put_get: ok ({} bytes, 2 replicas)", data.len());
    Ok(())
}
