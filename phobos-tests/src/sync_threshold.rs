//! Drives enough small `release{to_sync}` calls past the configured
//! request-count threshold to watch a medium flip from `empty` to `used`.

use anyhow::{ensure, Context};
use phobos::codec::{
    MediumSpec, ReleaseMedium, ReleaseReq, Request, RequestBody, ResponseBody, WriteAllocReq,
};
use phobos::config::Config;
use phobos::model::{FsStatus, MediumFamily};

pub fn run() -> anyhow::Result<()> {
    let mut scheduler = crate::fixture::build(1, 1 << 20);
    let threshold = *Config::default()
        .sync_nb_req_threshold
        .get(&MediumFamily::Dir)
        .context("no sync_nb_req_threshold configured for dir media")?;

    scheduler.enqueue(Request {
        id: 1,
        body: RequestBody::WriteAlloc(WriteAllocReq {
            n_media: 1,
            per_medium: MediumSpec {
                size: 10,
                family: MediumFamily::Dir,
                tags: vec![],
                library: None,
            },
        }),
    });
    let responses = scheduler.run_once(std::time::SystemTime::now());
    let ResponseBody::WriteAlloc(alloc) = responses.into_iter().next().context("no response to write_alloc")?.body
    else {
        anyhow::bail!("expected a write_alloc response");
    };
    let medium_id = alloc.media[0].id.clone();

    for n in 0..threshold as u64 {
        scheduler.enqueue(Request {
            id: 10 + n,
            body: RequestBody::Release(ReleaseReq {
                media: vec![ReleaseMedium {
                    id: medium_id.clone(),
                    rc: None,
                    size_written: 1,
                    to_sync: true,
                }],
            }),
        });
        scheduler.run_once(std::time::SystemTime::now());
    }

    let medium = scheduler
        .mediums()
        .get_one(&medium_id.to_string())
        .context("medium row vanished")?;
    ensure!(
        medium.fs_status == FsStatus::Used,
        "expected fs_status to flip to Used after {threshold} releases, got {:?}",
        medium.fs_status
    );
    println!("sync_threshold: ok (flipped to Used after {threshold} releases)");
    Ok(())
}
