use flipcore::fairness::{self, VerificationBundle};
use flipcore::{AuditStore, PayoutTable};

fn main() {
    let db_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "./flipcore_data".to_string());

    let store = AuditStore::open(&db_path).expect("Failed to open audit store");
    let sessions = store.load_all_sessions().expect("Failed to scan sessions");

    if sessions.is_empty() {
        println!("❌ No session data found in {}", db_path);
        return;
    }

    println!("🔍 Flip Session Fairness Verification");
    println!("=====================================");
    println!("Sessions on record: {}\n", sessions.len());

    let mut verified: u64 = 0;
    let mut failed: u64 = 0;
    let mut skipped: u64 = 0;

    for record in &sessions {
        // Only terminal sessions have a revealed seed to check against.
        let server_seed = match &record.server_seed {
            Some(seed) => seed.clone(),
            None => {
                skipped += 1;
                continue;
            }
        };

        let snapshot = match store.load_snapshot(&record.snapshot_id) {
            Ok(Some(snapshot)) => snapshot,
            _ => {
                println!(
                    "   ❌ Session {}: config snapshot {} missing",
                    record.id, record.snapshot_id
                );
                failed += 1;
                continue;
            }
        };
        let table = match PayoutTable::build(&snapshot.denominations) {
            Ok(table) => table,
            Err(e) => {
                println!("   ❌ Session {}: bad snapshot: {}", record.id, e);
                failed += 1;
                continue;
            }
        };

        let draws = match store.load_draws(&record.id) {
            Ok(draws) => draws,
            Err(e) => {
                println!("   ❌ Session {}: cannot load draws: {}", record.id, e);
                failed += 1;
                continue;
            }
        };
        if draws.len() != record.draw_count as usize {
            println!(
                "   ❌ Session {}: {} draws on record, session says {}",
                record.id,
                draws.len(),
                record.draw_count
            );
            failed += 1;
            continue;
        }

        let bundle = VerificationBundle {
            session_id: record.id,
            server_seed,
            server_seed_hash: record.server_seed_hash.clone(),
            client_seed: record.client_seed.clone(),
            stake_minor: record.stake_minor,
            snapshot_id: record.snapshot_id,
            draws,
        };

        match fairness::verify_bundle(&bundle, &table) {
            Ok(()) => verified += 1,
            Err(e) => {
                println!("   ❌ Session {}: {}", record.id, e);
                failed += 1;
            }
        }
    }

    println!("📊 Verification Summary:");
    println!("   Verified: {}", verified);
    println!("   Failed:   {}", failed);
    println!("   Skipped (not yet terminal): {}", skipped);

    if failed == 0 {
        println!("\n✅ ALL SETTLED SESSIONS VERIFIED!");
        println!("   Every recorded roll recomputes from the revealed seed");
        println!("   Every outcome matches its snapshot's payout table");
    } else {
        println!("\n❌ FAIRNESS VERIFICATION FAILED!");
        std::process::exit(1);
    }
}
