//! Puts a 2-replica object, takes one of its two drives out of rotation
//! with `notify{lock}`, and checks the object is still readable from the
//! surviving replica.

use anyhow::{ensure, Context};
use phobos::adapters::fake::FakeIo;
use phobos::codec::{NotifyOp, NotifyReq, RequestBody, ResponseBody};
use phobos::model::{DeviceId, MediumFamily};
use phobos::store::{InProcessClient, SchedulerClient, Store};

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
    let data = b"this object must survive one drive going offline".to_vec();

    {
        let mut client = InProcessClient::new(&mut scheduler);
        store
            .put(&mut client, &mut io, "obj-failover", MediumFamily::Dir, 2, vec![], &data)
            .context("put failed")?;
    }

    // Both drives were used by the 2-replica put; locking either one
    // simulates it going offline mid-session.
    let resp = {
        let mut client = InProcessClient::new(&mut scheduler);
        client
            .call(RequestBody::Notify(NotifyReq {
                op: NotifyOp::Lock,
                resource_id: DeviceId {
                    family: MediumFamily::Dir,
                    serial: "drv0".into(),
                },
                wait: false,
            }))
            .context("notify{lock} failed")?
    };
    ensure!(matches!(resp, ResponseBody::Notify(ack) if ack.ok), "notify{{lock}} did not acknowledge");

    let read_back = {
        let mut client = InProcessClient::new(&mut scheduler);
        store.get(&mut client, &mut io, "obj-failover").context("get failed after locking one drive")?
    };
    ensure!(read_back == data, "read back {} bytes, expected {}", read_back.len(), data.len());
    println!("failover: ok (read succeeded with one of two drives locked)");
    Ok(())
}
