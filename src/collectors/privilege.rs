use nix::unistd::{geteuid, Uid};

pub fn is_privileged_user() -> bool {
    is_privileged(geteuid())
}

fn is_privileged(uid: Uid) -> bool {
    uid.is_root()
}
