use std::io::Write;

use panopticon_session::{next_record, status, Record, Session, SessionError};
use panopticon_types::Ref;

/// Minimal PE32+ executable: entry at RVA 0x1000 inside one code section.
fn sample_pe(code: &[u8]) -> Vec<u8> {
    let mut image = vec![0u8; 0x200 + code.len()];

    image[0] = b'M';
    image[1] = b'Z';
    image[0x3c..0x40].copy_from_slice(&0x80u32.to_le_bytes());

    image[0x80..0x84].copy_from_slice(b"PE\0\0");
    image[0x84..0x86].copy_from_slice(&0x8664u16.to_le_bytes());
    image[0x86..0x88].copy_from_slice(&1u16.to_le_bytes());
    image[0x94..0x96].copy_from_slice(&0x70u16.to_le_bytes());
    image[0x96..0x98].copy_from_slice(&0x0002u16.to_le_bytes());

    let opt = 0x98;
    image[opt..opt + 2].copy_from_slice(&0x20bu16.to_le_bytes());
    image[opt + 16..opt + 20].copy_from_slice(&0x1000u32.to_le_bytes());
    image[opt + 24..opt + 32].copy_from_slice(&0x40_0000u64.to_le_bytes());

    let sec = opt + 0x70;
    image[sec..sec + 5].copy_from_slice(b".text");
    image[sec + 8..sec + 12].copy_from_slice(&(code.len() as u32).to_le_bytes());
    image[sec + 12..sec + 16].copy_from_slice(&0x1000u32.to_le_bytes());
    image[sec + 16..sec + 20].copy_from_slice(&(code.len() as u32).to_le_bytes());
    image[sec + 20..sec + 24].copy_from_slice(&0x200u32.to_le_bytes());

    image[0x200..0x200 + code.len()].copy_from_slice(code);
    image
}

fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();

    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

fn pe_session() -> Session {
    // mov al, 1; add al, 2; ret
    let file = write_temp(&sample_pe(&[0xb0, 0x01, 0x04, 0x02, 0xc3]));

    Session::open_program(file.path()).unwrap()
}

#[test]
fn pe_images_disassemble_from_the_entry_point() {
    let session = pe_session();

    assert_eq!(session.database.programs.len(), 1);

    let program = &session.database.programs[0];
    let entry_proc = program.find_procedure_at(0x40_1000).unwrap();
    let proc = program.calls().vertex_label(entry_proc).unwrap();
    let bb = proc.block(proc.entry.unwrap()).unwrap();
    let opcodes: Vec<&str> = bb.mnemonics().iter().map(|m| m.opcode.as_str()).collect();

    assert_eq!(opcodes, vec!["mov", "add", "ret"]);
}

#[test]
fn next_record_finds_decoded_blocks() {
    let session = pe_session();
    let record = next_record(&Ref::new("base", 0x40_0000), &session.database);

    match record {
        Some(Record::Block { area, .. }) => assert_eq!(area.lower(), 0x40_1000),
        other => panic!("unexpected record {other:?}"),
    }
}

#[test]
fn comments_undo_and_redo() {
    let mut session = pe_session();
    let at = Ref::new("base", 0x40_1000);

    assert!(!session.can_undo());
    session.comment_on(at.clone(), "entry point").unwrap();
    assert_eq!(
        session.database.comments.get(&at).map(String::as_str),
        Some("entry point")
    );

    session.undo().unwrap();
    assert!(session.database.comments.is_empty());
    assert!(session.can_redo());

    session.redo().unwrap();
    assert_eq!(
        session.database.comments.get(&at).map(String::as_str),
        Some("entry point")
    );

    assert!(matches!(session.redo(), Err(SessionError::NothingToRedo)));
}

#[test]
fn rename_round_trips_through_undo() {
    let mut session = pe_session();
    let uuid = {
        let program = &session.database.programs[0];
        let (_, proc) = program.procedures().next().unwrap();

        proc.uuid
    };
    let original = session.database.programs[0]
        .procedures()
        .next()
        .unwrap()
        .1
        .name
        .clone();

    session.rename_function(uuid, "start").unwrap();
    assert_eq!(
        session.database.programs[0].procedures().next().unwrap().1.name,
        "start"
    );

    session.undo().unwrap();
    assert_eq!(
        session.database.programs[0].procedures().next().unwrap().1.name,
        original
    );

    assert!(matches!(
        session.rename_function(uuid::Uuid::new_v4(), "nope"),
        Err(SessionError::UnknownFunction(_))
    ));
}

#[test]
fn value_overrides() {
    let mut session = pe_session();
    let uuid = session.database.programs[0].procedures().next().unwrap().1.uuid;

    session.set_value_for(uuid, "al", "0x2a").unwrap();
    assert_eq!(
        session.database.values[&uuid].get("al").map(String::as_str),
        Some("0x2a")
    );

    session.undo().unwrap();
    assert!(session.database.values[&uuid].get("al").is_none());
}

#[test]
fn a_fresh_command_clears_the_redo_stack() {
    let mut session = pe_session();
    let at = Ref::new("base", 0x40_1000);

    session.comment_on(at.clone(), "one").unwrap();
    session.undo().unwrap();
    session.comment_on(at, "two").unwrap();
    assert!(!session.can_redo());
}

#[test]
fn sessions_save_and_reopen() {
    let mut session = pe_session();

    session.comment_on(Ref::new("base", 0x40_1000), "entry").unwrap();

    let file = tempfile::NamedTempFile::new().unwrap();

    session.save(file.path()).unwrap();
    assert_eq!(session.path(), Some(file.path()));

    let reopened = Session::open(file.path()).unwrap();

    assert_eq!(reopened.database.title, session.database.title);
    assert_eq!(reopened.database.comments, session.database.comments);
    assert_eq!(
        reopened.database.programs.len(),
        session.database.programs.len()
    );

    let before = &session.database.programs[0];
    let after = &reopened.database.programs[0];

    assert_eq!(before.uuid, after.uuid);
    for ((_, a), (_, b)) in before.procedures().zip(after.procedures()) {
        assert_eq!(a.uuid, b.uuid);
        assert_eq!(a.name, b.name);
        assert_eq!(a.entry, b.entry);
    }

    // the memory map round-trips as well
    assert_eq!(reopened.database.projection(), session.database.projection());
}

#[test]
fn raw_avr_images_load() {
    // add r16, r17 ; ret
    let file = write_temp(&[0x01, 0x0f, 0x08, 0x95]);
    let session = Session::open_program(file.path()).unwrap();

    assert_eq!(session.database.programs.len(), 1);
    assert_eq!(session.database.programs[0].region, "base");
}

#[test]
fn garbage_is_rejected_with_a_status_code() {
    let file = write_temp(b"MZ\x01\x02");
    let result = Session::open_program(file.path()).map(|_| ());

    assert!(matches!(result, Err(SessionError::BadImage(_))));
    assert_eq!(status(result), -3);
    assert_eq!(status(Ok(())), 0);
}
